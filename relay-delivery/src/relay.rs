use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{config::RelayConfig, envelope::Envelope, tracing};

use crate::{transaction::SmtpTransaction, transform};

/// Outcome of handing one envelope to the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResult {
    Accepted,
    /// `reason` names the failing stage, e.g. `connection error: …`.
    Failed { reason: String },
}

impl RelayResult {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Something that can take a complete envelope off our hands.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    async fn relay(&self, envelope: &Envelope) -> RelayResult;
}

/// Relays each envelope over its own connection to the configured upstream.
///
/// Nothing is kept between envelopes: no pooling, no queue, no retry.
#[derive(Debug, Clone)]
pub struct OutboundRelay {
    config: Arc<RelayConfig>,
}

impl OutboundRelay {
    #[must_use]
    pub const fn new(config: Arc<RelayConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Relay for OutboundRelay {
    async fn relay(&self, envelope: &Envelope) -> RelayResult {
        let content = transform::apply(self.config.transform, envelope);

        match SmtpTransaction::new(envelope, &content, &self.config)
            .execute()
            .await
        {
            Ok(()) => {
                tracing::info!(
                    sender = envelope.sender(),
                    recipients = ?envelope.recipients(),
                    upstream = %self.config.upstream,
                    size = content.len(),
                    "Message relayed"
                );
                RelayResult::Accepted
            }
            Err(err) => {
                tracing::warn!(
                    sender = envelope.sender(),
                    recipients = ?envelope.recipients(),
                    upstream = %self.config.upstream,
                    error = %err,
                    "Relay failed"
                );
                RelayResult::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
