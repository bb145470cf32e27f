//! Startup configuration shared by every session.
//!
//! - [`relay`]: upstream, credentials and outbound policy
//! - [`timeouts`]: inbound and outbound timeouts

pub mod relay;
pub mod timeouts;

pub use relay::{Credentials, RelayConfig, TlsMode, TransformStrategy, Upstream};
pub use timeouts::{ClientTimeouts, ServerTimeouts};
