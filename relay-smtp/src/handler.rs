//! The callback surface between the inbound acceptor and whatever decides
//! the fate of a mail transaction.
//!
//! The acceptor owns syntax, greeting and the DATA phase. Everything about
//! envelope sequencing is delegated here, so an implementation rejecting a
//! call with a [`ProtocolError`] is what produces a `503` on the wire.

use std::net::SocketAddr;

use async_trait::async_trait;
use relay_common::{error::ProtocolError, status::Reply};

#[async_trait]
pub trait SmtpTransactionHandler: Send {
    /// `MAIL FROM` with a syntactically valid reverse-path.
    ///
    /// # Errors
    /// When a sender is not acceptable in the current state.
    fn on_mail_from(&mut self, sender: &str) -> Result<(), ProtocolError>;

    /// `RCPT TO` with a syntactically valid forward-path.
    ///
    /// # Errors
    /// When a recipient is not acceptable in the current state.
    fn on_rcpt_to(&mut self, recipient: &str) -> Result<(), ProtocolError>;

    /// `DATA`, asked before the client is invited to send content.
    ///
    /// # Errors
    /// When the envelope is not complete enough to accept a body.
    fn on_data_start(&self) -> Result<(), ProtocolError>;

    /// The full, unstuffed body. The returned reply is the final word on
    /// this transaction.
    async fn on_data_complete(&mut self, body: Vec<u8>) -> Reply;

    /// `RSET`, `EHLO`/`HELO`, or a body rejected by the acceptor itself.
    fn on_reset(&mut self);
}

/// Builds one handler per accepted connection.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: SmtpTransactionHandler + 'static;

    fn create(&self, peer: SocketAddr) -> Self::Handler;
}
