//! SMTP transaction execution
//!
//! One upstream connection per envelope: connect, secure the transport
//! according to the configured [`TlsMode`], authenticate, transfer the
//! message and always try to say `QUIT`.

use core::future::Future;
use std::time::Duration;

use relay_common::{
    config::{RelayConfig, TlsMode},
    envelope::Envelope,
    tracing,
};
use relay_smtp::client::{self, Capabilities, ClientError, Mechanism, SmtpClient};

use crate::error::RelayError;

/// Where in the conversation a failure happened, which decides how it is
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connect,
    Tls,
    Auth,
    Transfer,
}

impl Stage {
    fn failed(self, message: String) -> RelayError {
        match self {
            Self::Connect => RelayError::Connection(message),
            Self::Tls => RelayError::Tls(message),
            Self::Auth => RelayError::Auth(message),
            Self::Transfer => RelayError::Delivery(message),
        }
    }

    fn timed_out(self, message: String) -> RelayError {
        match self {
            Self::Transfer => RelayError::Delivery(message),
            Self::Connect | Self::Tls | Self::Auth => RelayError::Connection(message),
        }
    }
}

/// Run one client step under `limit`.
///
/// A TLS failure is reported as such wherever it happens; anything else is
/// attributed to `stage`.
async fn step<T, F>(stage: Stage, what: &str, limit: Duration, future: F) -> Result<T, RelayError>
where
    F: Future<Output = client::Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ClientError::TlsError(reason))) => Err(RelayError::Tls(reason)),
        Ok(Err(err)) => Err(stage.failed(format!("{what} failed: {err}"))),
        Err(_) => Err(stage.timed_out(format!("{what} timed out after {limit:?}"))),
    }
}

/// A single delivery of one envelope to the configured upstream.
pub struct SmtpTransaction<'a> {
    envelope: &'a Envelope,
    /// Content to transmit, possibly transformed from the envelope's body.
    body: &'a [u8],
    config: &'a RelayConfig,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(envelope: &'a Envelope, body: &'a [u8], config: &'a RelayConfig) -> Self {
        Self {
            envelope,
            body,
            config,
        }
    }

    /// Execute the complete SMTP transaction.
    ///
    /// Once connected, `QUIT` is attempted whatever the outcome; a failure
    /// to close is only logged.
    ///
    /// # Errors
    ///
    /// Returns the first failure, classified by the stage it happened in.
    #[tracing::instrument(skip_all, fields(upstream = %self.config.upstream, tls = %self.config.tls))]
    pub async fn execute(self) -> Result<(), RelayError> {
        let mut client = self.connect().await?;

        let outcome = self.converse(&mut client).await;

        self.quit(&mut client).await;

        outcome
    }

    async fn connect(&self) -> Result<SmtpClient, RelayError> {
        let upstream = &self.config.upstream;
        let limit = self.config.timeouts.connect();

        let client = tokio::time::timeout(limit, SmtpClient::connect(&upstream.host, upstream.port))
            .await
            .map_err(|_| {
                RelayError::Connection(format!(
                    "connecting to {upstream} timed out after {limit:?}"
                ))
            })?
            .map_err(|err| RelayError::Connection(format!("failed to connect to {upstream}: {err}")))?;

        tracing::debug!("Connected to upstream");

        Ok(client.accept_invalid_certs(self.config.accept_invalid_certs))
    }

    async fn converse(&self, client: &mut SmtpClient) -> Result<(), RelayError> {
        let capabilities = self.secure(client).await?;

        if self.config.tls.is_encrypted() && !client.is_encrypted() {
            return Err(RelayError::Tls(String::from(
                "connection is not encrypted, refusing to send credentials",
            )));
        }

        self.authenticate(client, &capabilities).await?;

        self.send_mail_from(client, &capabilities).await?;
        self.send_rcpt_to(client).await?;
        self.send_message_data(client).await
    }

    /// Bring the connection to the point where credentials may be sent,
    /// returning what the upstream advertised over the final transport.
    async fn secure(&self, client: &mut SmtpClient) -> Result<Capabilities, RelayError> {
        let timeouts = &self.config.timeouts;

        if self.config.tls == TlsMode::ImplicitTls {
            step(
                Stage::Tls,
                "TLS handshake",
                timeouts.tls(),
                client.upgrade_to_tls(),
            )
            .await?;
        }

        let greeting = step(
            Stage::Connect,
            "Reading greeting",
            timeouts.ehlo(),
            client.read_greeting(),
        )
        .await?;

        if !greeting.is_success() {
            return Err(RelayError::Connection(format!(
                "upstream refused the connection: {greeting}"
            )));
        }

        let capabilities = self.greet(client).await?;

        if self.config.tls != TlsMode::StartTls {
            return Ok(capabilities);
        }

        if !capabilities.supports("STARTTLS") {
            return Err(RelayError::Tls(String::from(
                "upstream does not offer STARTTLS",
            )));
        }

        let response = step(Stage::Tls, "STARTTLS", timeouts.tls(), client.starttls()).await?;

        if !response.is_success() {
            return Err(RelayError::Tls(format!(
                "upstream refused STARTTLS: {response}"
            )));
        }

        tracing::debug!("Upgraded upstream connection with STARTTLS");

        // What was advertised in plaintext no longer counts
        self.greet(client).await
    }

    /// `EHLO`, falling back to `HELO` for servers that do not speak ESMTP.
    async fn greet(&self, client: &mut SmtpClient) -> Result<Capabilities, RelayError> {
        let helo_name = &self.config.helo_name;
        let limit = self.config.timeouts.ehlo();

        let (response, capabilities) =
            step(Stage::Connect, "EHLO", limit, client.ehlo(helo_name)).await?;

        if response.is_success() {
            return Ok(capabilities);
        }

        tracing::debug!(%response, "Upstream rejected EHLO, trying HELO");

        let response = step(Stage::Connect, "HELO", limit, client.helo(helo_name)).await?;

        if response.is_success() {
            Ok(Capabilities::default())
        } else {
            Err(RelayError::Connection(format!(
                "upstream rejected HELO: {response}"
            )))
        }
    }

    async fn authenticate(
        &self,
        client: &mut SmtpClient,
        capabilities: &Capabilities,
    ) -> Result<(), RelayError> {
        let advertised = capabilities.auth_mechanisms();

        let Some(mechanism) = Mechanism::select(&advertised) else {
            return Err(RelayError::Auth(if advertised.is_empty() {
                String::from("upstream does not offer AUTH")
            } else {
                format!(
                    "no supported mechanism among {}",
                    advertised.join(", ")
                )
            }));
        };

        let credentials = &self.config.credentials;
        let response = step(
            Stage::Auth,
            "AUTH",
            self.config.timeouts.auth(),
            client.authenticate(mechanism, &credentials.username, credentials.password()),
        )
        .await?;

        if !response.is_success() {
            return Err(RelayError::Auth(format!(
                "upstream rejected {mechanism} login: {response}"
            )));
        }

        tracing::debug!(%mechanism, "Authenticated with upstream");

        Ok(())
    }

    async fn send_mail_from(
        &self,
        client: &mut SmtpClient,
        capabilities: &Capabilities,
    ) -> Result<(), RelayError> {
        let size = capabilities
            .supports("SIZE")
            .then_some(self.body.len());

        let response = step(
            Stage::Transfer,
            "MAIL FROM",
            self.config.timeouts.mail_from(),
            client.mail_from(self.envelope.sender(), size),
        )
        .await?;

        if !response.is_success() {
            return Err(RelayError::Delivery(format!(
                "upstream rejected MAIL FROM: {response}"
            )));
        }

        Ok(())
    }

    /// Every recipient must be accepted; the first rejection fails the
    /// whole transaction.
    async fn send_rcpt_to(&self, client: &mut SmtpClient) -> Result<(), RelayError> {
        let limit = self.config.timeouts.rcpt_to();

        for recipient in self.envelope.recipients() {
            let response = step(
                Stage::Transfer,
                "RCPT TO",
                limit,
                client.rcpt_to(recipient),
            )
            .await?;

            if !response.is_success() {
                return Err(RelayError::Delivery(format!(
                    "upstream rejected recipient {recipient}: {response}"
                )));
            }
        }

        Ok(())
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<(), RelayError> {
        let limit = self.config.timeouts.data();

        let response = step(Stage::Transfer, "DATA", limit, client.data()).await?;

        if !response.is_intermediate() {
            return Err(RelayError::Delivery(format!(
                "upstream rejected DATA: {response}"
            )));
        }

        let response = step(
            Stage::Transfer,
            "Sending message content",
            limit,
            client.send_data(self.body),
        )
        .await?;

        if !response.is_success() {
            return Err(RelayError::Delivery(format!(
                "upstream rejected the message: {response}"
            )));
        }

        Ok(())
    }

    async fn quit(&self, client: &mut SmtpClient) {
        let limit = self.config.timeouts.quit();

        match tokio::time::timeout(limit, client.quit()).await {
            Ok(Ok(response)) => tracing::trace!(%response, "Upstream said goodbye"),
            Ok(Err(err)) => tracing::warn!(error = %err, "QUIT failed"),
            Err(_) => tracing::warn!(timeout = ?limit, "QUIT timed out"),
        }
    }
}
