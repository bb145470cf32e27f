//! Outbound SMTP client.
//!
//! A thin, explicit client: every step (greeting, EHLO, STARTTLS, AUTH,
//! MAIL, RCPT, DATA, QUIT) is its own call so the caller decides ordering
//! and timeouts. SMTP rejections come back as [`Response`]s; only transport
//! and parse failures are [`ClientError`]s.

mod auth;
mod capabilities;
#[allow(clippy::module_inception)]
mod client;
mod error;
mod response;
mod tls;

pub use auth::Mechanism;
pub use capabilities::Capabilities;
pub use client::{SmtpClient, dot_stuff};
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
