//! Typed errors for a single relay attempt.
//!
//! Each variant names the stage that failed. The display text is what the
//! inbound client finally sees after `550 Error: `.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The upstream could not be reached, or the conversation broke off
    /// outside of TLS and message transfer.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport security could not be established.
    #[error("tls error: {0}")]
    Tls(String),

    /// The upstream refused the credentials, or offers no usable mechanism.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The upstream rejected the sender, a recipient or the content.
    #[error("delivery error: {0}")]
    Delivery(String),
}
