//! Error types shared by the relay crates.
//!
//! Outbound failures live in `relay-delivery`; the types here cover the
//! inbound side and configuration.

use std::io;

use thiserror::Error;

/// A command arrived in a state that does not accept it.
///
/// The display text doubles as the 503 reply sent to the inbound client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Sender already specified")]
    SenderAlreadySpecified,

    #[error("Need MAIL command")]
    MissingSender,

    #[error("Need RCPT command")]
    MissingRecipients,

    #[error("Transaction already completed")]
    TransactionClosed,
}

/// Errors that can end an inbound session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// Returns `true` if the client simply went quiet for too long.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors raised while setting up or running the inbound listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind listener to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Rejected relay configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
