use std::mem;

use crate::error::ProtocolError;

/// A complete message ready to be relayed.
///
/// Only [`EnvelopeBuilder::on_data_complete`] produces one, so a sender and
/// at least one recipient are always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    recipients: Vec<String>,
    body: Vec<u8>,
}

impl Envelope {
    /// Reverse-path given in `MAIL FROM`. Empty for the null sender `<>`.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Forward-paths in the order they were accepted.
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Raw message bytes, dot-unstuffed, without the terminating `.` line.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Accumulates the sender and recipients of one inbound transaction.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    sender: Option<String>,
    recipients: Vec<String>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sender.
    ///
    /// # Errors
    /// If a sender has already been recorded for this transaction.
    pub fn on_mail_from(&mut self, sender: impl Into<String>) -> Result<(), ProtocolError> {
        if self.sender.is_some() {
            return Err(ProtocolError::SenderAlreadySpecified);
        }

        self.sender = Some(sender.into());
        Ok(())
    }

    /// Append a recipient. Duplicates are kept.
    ///
    /// # Errors
    /// If no sender has been recorded yet.
    pub fn on_rcpt_to(&mut self, recipient: impl Into<String>) -> Result<(), ProtocolError> {
        if self.sender.is_none() {
            return Err(ProtocolError::MissingSender);
        }

        self.recipients.push(recipient.into());
        Ok(())
    }

    /// Seal the transaction with its body, leaving the builder empty.
    ///
    /// # Errors
    /// If the sender or every recipient is missing. The builder is left
    /// untouched in that case.
    pub fn on_data_complete(&mut self, body: Vec<u8>) -> Result<Envelope, ProtocolError> {
        if self.sender.is_none() {
            return Err(ProtocolError::MissingSender);
        }
        if self.recipients.is_empty() {
            return Err(ProtocolError::MissingRecipients);
        }

        Ok(Envelope {
            sender: self.sender.take().unwrap_or_default(),
            recipients: mem::take(&mut self.recipients),
            body,
        })
    }

    /// Drop everything recorded so far.
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }
}
