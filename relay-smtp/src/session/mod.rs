use std::{net::SocketAddr, sync::Arc, time::Duration};

use relay_common::{
    Signal, config::ServerTimeouts, error::SessionError, internal, outgoing, status::Status,
    tracing,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
    time::Instant,
};

use crate::{
    connection::{Connection, Line},
    handler::SmtpTransactionHandler,
};

mod events;
mod io;
mod response;

/// Longest command line we accept, including CRLF. RFC 5321 asks for 512.
const MAX_COMMAND_LINE: usize = 2048;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(crate) enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

pub(crate) type Response = (Vec<String>, Event);

/// Where the inbound conversation is.
///
/// Envelope sequencing is the handler's business. This only tracks what the
/// acceptor itself must know: whether the client greeted us and whether the
/// next lines are message content.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    #[default]
    Connect,
    Greeted,
    Reading,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name used in the greeting and EHLO reply.
    pub banner: String,
    /// Largest accepted body in bytes, advertised through `SIZE`. Zero means
    /// unlimited.
    pub max_message_size: usize,
    pub timeouts: ServerTimeouts,
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    banner: Option<String>,
    max_message_size: usize,
    timeouts: ServerTimeouts,
}

impl SessionConfigBuilder {
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Falls back to `$HOSTNAME`, then `localhost`, when no banner was set.
    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            banner: self
                .banner
                .filter(|banner| !banner.is_empty())
                .unwrap_or_else(|| {
                    std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("localhost"))
                }),
            max_message_size: self.max_message_size,
            timeouts: self.timeouts,
        }
    }
}

/// One inbound connection, from greeting to `QUIT` or disconnect.
pub struct Session<Stream, Handler> {
    peer: SocketAddr,
    connection: Connection<Stream>,
    handler: Handler,
    state: State,
    config: Arc<SessionConfig>,
    start_time: Instant,
}

impl<Stream, Handler> Session<Stream, Handler>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    Handler: SmtpTransactionHandler,
{
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        handler: Handler,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            peer,
            connection: Connection::new(stream),
            handler,
            state: State::default(),
            config,
            start_time: Instant::now(),
        }
    }

    /// Drive the conversation until the client quits, disconnects, times out
    /// or `signal` asks us to stop.
    ///
    /// A shutdown signal is only honoured between commands; a transaction
    /// whose content has been received is always carried through to its
    /// reply.
    ///
    /// # Errors
    /// I/O failures on the inbound stream and timeouts.
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!(level = DEBUG, "Connected");

        let result = self.converse(&mut signal).await;

        internal!(level = DEBUG, "Connection closed");
        result
    }

    async fn converse(
        &mut self,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        let greeting = format!("{} {} ESMTP", Status::ServiceReady, self.config.banner);
        self.reply(&[greeting]).await?;

        loop {
            let Some(wait) = self.remaining(self.config.timeouts.command()) else {
                tracing::warn!(
                    peer = %self.peer,
                    max_secs = self.config.timeouts.connection_secs,
                    "Connection exceeded maximum lifetime, closing"
                );
                self.reply(&[format!(
                    "{} Connection lifetime exceeded",
                    Status::Unavailable
                )])
                .await?;
                return Err(SessionError::Timeout(self.config.timeouts.connection_secs));
            };

            let received = tokio::select! {
                _ = signal.recv() => None,
                line = tokio::time::timeout(wait, self.connection.read_line(MAX_COMMAND_LINE)) => Some(line),
            };

            let Some(received) = received else {
                internal!(level = INFO, "Shutdown requested, closing session");
                self.reply(&[format!("{} Server shutting down", Status::Unavailable)])
                    .await?;
                return Ok(());
            };

            let Ok(line) = received else {
                tracing::warn!(peer = %self.peer, state = ?self.state, "Client connection timed out");
                self.reply(&[format!("{} Timeout, closing connection", Status::Unavailable)])
                    .await?;
                return Err(SessionError::Timeout(wait.as_secs()));
            };

            let (response, event) = match line? {
                Line::Closed => {
                    internal!(level = DEBUG, "Client disconnected");
                    return Ok(());
                }
                Line::TooLong => response::single(Status::CommandUnrecognised, "Line too long"),
                Line::Complete(received) => self.handle_command(&received),
            };

            self.reply(&response).await?;

            if event == Event::ConnectionClose {
                return Ok(());
            }

            if self.state == State::Reading {
                let Some(response) = self.receive_message().await? else {
                    internal!(level = DEBUG, "Client disconnected during DATA, message discarded");
                    return Ok(());
                };

                self.reply(&response).await?;
            }
        }
    }

    /// `wanted`, clipped to what is left of the connection lifetime.
    fn remaining(&self, wanted: Duration) -> Option<Duration> {
        let left = self
            .config
            .timeouts
            .connection()
            .checked_sub(self.start_time.elapsed())
            .filter(|left| !left.is_zero())?;

        Some(wanted.min(left))
    }

    async fn reply(&mut self, lines: &[String]) -> Result<(), SessionError> {
        for line in lines {
            outgoing!("{line}");
        }

        self.connection.send(lines).await.map_err(|err| {
            internal!(level = ERROR, "Failed to send response: {err}");
            SessionError::Connection(err)
        })
    }
}
