//! Getting an accepted envelope to the upstream server, and the glue that
//! lets the inbound acceptor drive it.

mod bridge;
pub mod error;
mod relay;
mod transaction;
pub mod transform;

pub use bridge::{BridgeState, RelayFactory, SessionBridge};
pub use error::RelayError;
pub use relay::{OutboundRelay, Relay, RelayResult};
pub use transaction::SmtpTransaction;
