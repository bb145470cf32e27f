//! The per-session callback surface between the inbound acceptor and the
//! outbound relay.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use relay_common::{
    envelope::EnvelopeBuilder,
    error::ProtocolError,
    internal,
    status::{Reply, Status},
    tracing,
};
use relay_smtp::{HandlerFactory, SmtpTransactionHandler};

use crate::relay::{Relay, RelayResult};

/// Where a session is in its current mail transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeState {
    #[default]
    Idle,
    HasSender,
    HasRecipients,
    Relaying,
    /// The last transaction got its final reply; a new `MAIL FROM` may
    /// start another.
    Done,
}

/// Assembles one envelope at a time and hands it to the relay once `DATA`
/// completes.
pub struct SessionBridge<R> {
    relay: Arc<R>,
    peer: SocketAddr,
    envelope: EnvelopeBuilder,
    state: BridgeState,
}

impl<R: Relay> SessionBridge<R> {
    pub fn new(relay: Arc<R>, peer: SocketAddr) -> Self {
        Self {
            relay,
            peer,
            envelope: EnvelopeBuilder::new(),
            state: BridgeState::Idle,
        }
    }

    pub const fn state(&self) -> BridgeState {
        self.state
    }
}

#[async_trait]
impl<R: Relay> SmtpTransactionHandler for SessionBridge<R> {
    fn on_mail_from(&mut self, sender: &str) -> Result<(), ProtocolError> {
        self.envelope.on_mail_from(sender)?;
        self.state = BridgeState::HasSender;
        Ok(())
    }

    fn on_rcpt_to(&mut self, recipient: &str) -> Result<(), ProtocolError> {
        self.envelope.on_rcpt_to(recipient)?;
        self.state = BridgeState::HasRecipients;
        Ok(())
    }

    fn on_data_start(&self) -> Result<(), ProtocolError> {
        match self.state {
            BridgeState::HasRecipients => Ok(()),
            BridgeState::HasSender => Err(ProtocolError::MissingRecipients),
            BridgeState::Idle | BridgeState::Done => Err(ProtocolError::MissingSender),
            BridgeState::Relaying => Err(ProtocolError::TransactionClosed),
        }
    }

    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    async fn on_data_complete(&mut self, body: Vec<u8>) -> Reply {
        let envelope = match self.envelope.on_data_complete(body) {
            Ok(envelope) => envelope,
            Err(err) => return Reply::new(Status::InvalidCommandSequence, err.to_string()),
        };

        self.state = BridgeState::Relaying;
        internal!(
            level = DEBUG,
            "Relaying message from <{}> to {} recipient(s)",
            envelope.sender(),
            envelope.recipients().len()
        );

        let result = self.relay.relay(&envelope).await;
        self.state = BridgeState::Done;

        match result {
            RelayResult::Accepted => Reply::new(Status::Ok, "Message accepted for delivery"),
            RelayResult::Failed { reason } => Reply::new(Status::Error, format!("Error: {reason}")),
        }
    }

    fn on_reset(&mut self) {
        self.envelope.reset();
        self.state = BridgeState::Idle;
    }
}

/// Hands every inbound connection its own [`SessionBridge`] over a shared
/// relay.
pub struct RelayFactory<R> {
    relay: Arc<R>,
}

impl<R: Relay> RelayFactory<R> {
    pub const fn new(relay: Arc<R>) -> Self {
        Self { relay }
    }
}

impl<R: Relay> HandlerFactory for RelayFactory<R> {
    type Handler = SessionBridge<R>;

    fn create(&self, peer: SocketAddr) -> Self::Handler {
        SessionBridge::new(Arc::clone(&self.relay), peer)
    }
}
