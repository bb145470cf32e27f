//! Mock upstream SMTP server for relay tests
//!
//! This module provides a configurable mock SMTP server that can:
//! - Answer each command with a configured reply, including `AUTH` and `STARTTLS`
//! - Reject individual recipients
//! - Record the commands it received and every raw byte of each connection
//! - Delay responses to test timeout handling
//! - Speak TLS, either from the first byte or after `STARTTLS`, using a
//!   self-signed certificate
//!
//! Without TLS enabled, after agreeing to `STARTTLS` it records whatever the
//! client sends next and hangs up, which is enough to see what a client does
//! before and at the start of a handshake. Bytes received over TLS are
//! recorded decrypted.
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_ehlo_capabilities(&["mock.local", "AUTH PLAIN"])
//!     .with_rejected_recipient("nobody@y.com", 550, "No such user")
//!     .build()
//!     .await?;
//!
//! // Server is now running on server.addr()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```
#![allow(dead_code)]

use std::{
    fmt::Write,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

const CERTIFICATE: &[u8] = include_bytes!("certs/mock.crt");
const PRIVATE_KEY: &[u8] = include_bytes!("certs/mock.key");

/// A server side TLS acceptor for the bundled self-signed certificate.
///
/// # Errors
///
/// Returns an error if the bundled certificate or key cannot be loaded.
pub fn tls_acceptor() -> io::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut &CERTIFICATE[..]).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut &PRIVATE_KEY[..])?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// How the mock secures a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockTls {
    /// Plaintext only
    Off,
    /// Handshake after a `220` answer to `STARTTLS`
    StartTls,
    /// Handshake before the greeting
    Implicit,
}

/// Where a conversation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Finished,
    /// `STARTTLS` was accepted and the handshake should start now
    Upgrade,
}

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    /// `AUTH` with everything after the verb, e.g. `PLAIN AHVzZXIAcGFzcw==`
    Auth(String),
    /// A line sent in answer to a 334 challenge
    AuthResponse(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), with dot-stuffing removed
    MessageContent(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

impl SmtpCommand {
    /// Whether this is part of a mail transaction, i.e. anything that should
    /// never be sent before authentication succeeded.
    pub const fn is_transaction(&self) -> bool {
        matches!(
            self,
            Self::MailFrom(_) | Self::RcptTo(_) | Self::Data | Self::MessageContent(_)
        )
    }
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    capabilities: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, cap) in self.capabilities.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "{}{separator}{cap}\r\n", self.code);
        }

        response.into_bytes()
    }
}

/// Mock SMTP server configuration
#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_response: EhloResponse,
    helo_response: SmtpResponse,
    starttls_response: Option<SmtpResponse>,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rejected_recipients: Vec<(String, SmtpResponse)>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,

    response_delay: Option<Duration>,
    tls: MockTls,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "mock.local ESMTP Mock SMTP Server"),
            ehlo_response: EhloResponse {
                code: 250,
                capabilities: vec![
                    "mock.local".to_string(),
                    "SIZE 10000".to_string(),
                    "AUTH PLAIN LOGIN".to_string(),
                ],
            },
            helo_response: SmtpResponse::new(250, "Hello"),
            starttls_response: None,
            auth_response: SmtpResponse::new(235, "Authentication successful"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rejected_recipients: Vec::new(),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            response_delay: None,
            tls: MockTls::Off,
        }
    }
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<RwLock<Vec<Vec<u8>>>>,
    handshakes: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

/// What every client task shares with the server.
#[derive(Clone)]
struct Shared {
    config: Arc<MockServerConfig>,
    acceptor: Option<TlsAcceptor>,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<RwLock<Vec<Vec<u8>>>>,
    handshakes: Arc<AtomicUsize>,
}

impl MockSmtpServer {
    /// Create a new builder for configuring the mock server
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    /// Get the address the server is listening on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get all commands received by the server, across connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Bytes received on each connection that has finished, in order of
    /// completion.
    pub async fn finished_connections(&self) -> Vec<Vec<u8>> {
        self.connections.read().await.clone()
    }

    /// Wait until `count` connections have finished, or give up after five
    /// seconds.
    pub async fn wait_for_connections(&self, count: usize) -> Vec<Vec<u8>> {
        let wait = async {
            loop {
                let connections = self.finished_connections().await;
                if connections.len() >= count {
                    return connections;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        match timeout(Duration::from_secs(5), wait).await {
            Ok(connections) => connections,
            Err(_) => self.finished_connections().await,
        }
    }

    /// Number of TLS handshakes completed, across connections
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(stream: TcpStream, shared: Shared) -> io::Result<()> {
        let mut raw = Vec::new();
        let result = Self::serve(stream, &shared, &mut raw).await;
        shared.connections.write().await.push(raw);
        result
    }

    async fn serve(mut stream: TcpStream, shared: &Shared, raw: &mut Vec<u8>) -> io::Result<()> {
        let config = &shared.config;
        let commands = &shared.commands;

        match (config.tls, &shared.acceptor) {
            (MockTls::Implicit, Some(acceptor)) => {
                let mut stream = acceptor.accept(stream).await?;
                shared.handshakes.fetch_add(1, Ordering::SeqCst);
                Self::converse(&mut stream, config, commands, raw, true).await?;
            }
            (MockTls::StartTls, Some(acceptor)) => {
                let phase = Self::converse(&mut stream, config, commands, raw, true).await?;
                if phase == Phase::Upgrade {
                    let mut stream = acceptor.accept(stream).await?;
                    shared.handshakes.fetch_add(1, Ordering::SeqCst);
                    Self::converse(&mut stream, config, commands, raw, false).await?;
                }
            }
            _ => {
                Self::converse(&mut stream, config, commands, raw, true).await?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    async fn converse<S>(
        stream: &mut S,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
        raw: &mut Vec<u8>,
        greet: bool,
    ) -> io::Result<Phase>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        if greet {
            writer.write_all(&config.greeting.to_bytes()).await?;
            writer.flush().await?;
        }

        loop {
            let Some(line) = read_line(&mut reader, raw).await? else {
                return Ok(Phase::Finished);
            };

            let line = String::from_utf8_lossy(&line);
            let cmd_line = line.trim_end_matches(['\r', '\n']);
            tracing::debug!("Mock server received: {}", cmd_line);

            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line, ""));

            let (response, smtp_cmd) = match verb.to_uppercase().as_str() {
                "EHLO" => (
                    config.ehlo_response.to_bytes(),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "HELO" => (
                    config.helo_response.to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "STARTTLS" => {
                    commands.write().await.push(SmtpCommand::StartTls);

                    let Some(response) = &config.starttls_response else {
                        writer
                            .write_all(&SmtpResponse::new(502, "Command not implemented").to_bytes())
                            .await?;
                        writer.flush().await?;
                        continue;
                    };

                    writer.write_all(&response.to_bytes()).await?;
                    writer.flush().await?;

                    if response.code != 220 {
                        continue;
                    }

                    if config.tls == MockTls::StartTls {
                        return Ok(Phase::Upgrade);
                    }

                    // The client now starts a handshake we cannot finish
                    let mut buffer = vec![0; 4096];
                    if let Ok(Ok(n)) =
                        timeout(Duration::from_secs(5), reader.read(&mut buffer)).await
                    {
                        raw.extend_from_slice(&buffer[..n]);
                    }
                    return Ok(Phase::Finished);
                }
                "AUTH" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(argument.to_string()));

                    let (mechanism, initial) =
                        argument.split_once(' ').unwrap_or((argument, ""));
                    let challenges = match (mechanism.to_uppercase().as_str(), initial) {
                        ("LOGIN", _) => vec!["VXNlcm5hbWU6", "UGFzc3dvcmQ6"],
                        ("PLAIN", "") => vec![""],
                        _ => Vec::new(),
                    };

                    for challenge in challenges {
                        let challenge = format!("334 {challenge}\r\n");
                        writer.write_all(challenge.as_bytes()).await?;
                        writer.flush().await?;

                        let Some(answer) = read_line(&mut reader, raw).await? else {
                            return Ok(Phase::Finished);
                        };
                        let answer = String::from_utf8_lossy(&answer).trim_end().to_string();
                        commands
                            .write()
                            .await
                            .push(SmtpCommand::AuthResponse(answer));
                    }

                    writer.write_all(&config.auth_response.to_bytes()).await?;
                    writer.flush().await?;
                    continue;
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => {
                    let address = argument
                        .split_once('<')
                        .and_then(|(_, rest)| rest.split_once('>'))
                        .map_or("", |(address, _)| address);

                    let response = config
                        .rejected_recipients
                        .iter()
                        .find(|(rejected, _)| rejected.eq_ignore_ascii_case(address))
                        .map_or(&config.rcpt_to_response, |(_, response)| response);

                    (
                        response.to_bytes(),
                        SmtpCommand::RcptTo(argument.to_string()),
                    )
                }
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "RSET" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Rset),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit_response.to_bytes()).await?;
                    writer.flush().await?;
                    writer.shutdown().await?;
                    return Ok(Phase::Finished);
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
            };

            let is_data = smtp_cmd == SmtpCommand::Data;
            commands.write().await.push(smtp_cmd);

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            writer.write_all(&response).await?;
            writer.flush().await?;

            if !is_data || config.data_response.code != 354 {
                continue;
            }

            // Read message content until we see <CRLF>.<CRLF>
            let mut message_content = Vec::new();
            loop {
                let Some(data_line) = read_line(&mut reader, raw).await? else {
                    return Ok(Phase::Finished);
                };

                if data_line == b".\r\n" || data_line == b".\n" {
                    break;
                }

                let unstuffed = data_line.strip_prefix(b".").unwrap_or(&data_line);
                message_content.extend_from_slice(unstuffed);
            }

            commands
                .write()
                .await
                .push(SmtpCommand::MessageContent(message_content));

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }
            writer.write_all(&config.data_end_response.to_bytes()).await?;
            writer.flush().await?;
        }
    }
}

/// Read up to and including the next `\n`, recording what was read.
/// `None` once the client hung up.
async fn read_line<R>(reader: &mut R, raw: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes_read = timeout(Duration::from_secs(10), reader.read_until(b'\n', &mut line))
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;

    raw.extend_from_slice(&line);
    Ok((bytes_read > 0).then_some(line))
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    /// Set the greeting message
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Set the EHLO capabilities. The first entry is the greeting line.
    #[must_use]
    pub fn with_ehlo_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.ehlo_response = EhloResponse {
            code: 250,
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
        };
        self
    }

    /// Answer EHLO with an error, as a server without ESMTP would
    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo_response = EhloResponse {
            code: 502,
            capabilities: vec!["Command not implemented".to_string()],
        };
        self
    }

    /// Set the STARTTLS response (enables STARTTLS)
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(code, message));
        self
    }

    /// Complete a real TLS handshake after agreeing to `STARTTLS`.
    ///
    /// Advertise `STARTTLS` through [`with_ehlo_capabilities`](Self::with_ehlo_capabilities).
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(220, "Ready to start TLS"));
        self.config.tls = MockTls::StartTls;
        self
    }

    /// Expect a TLS handshake before anything else, as on port 465
    #[must_use]
    pub const fn with_implicit_tls(mut self) -> Self {
        self.config.tls = MockTls::Implicit;
        self
    }

    /// Set the final reply to AUTH
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the MAIL FROM response
    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the RCPT TO response for recipients not otherwise configured
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Answer RCPT TO for `address` with the given reply
    #[must_use]
    pub fn with_rejected_recipient(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rejected_recipients
            .push((address.into(), SmtpResponse::new(code, message)));
        self
    }

    /// Set the DATA command response
    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Add a delay before sending each response
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, io::Error> {
        // Bind to a random available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let acceptor = match self.config.tls {
            MockTls::Off => None,
            MockTls::StartTls | MockTls::Implicit => Some(tls_acceptor()?),
        };

        let shared = Shared {
            config: Arc::new(self.config),
            acceptor,
            commands: Arc::new(RwLock::new(Vec::new())),
            connections: Arc::new(RwLock::new(Vec::new())),
            handshakes: Arc::new(AtomicUsize::new(0)),
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = MockSmtpServer {
            addr,
            commands_received: Arc::clone(&shared.commands),
            connections: Arc::clone(&shared.connections),
            handshakes: Arc::clone(&shared.handshakes),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(async move {
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                // Accept connection with timeout to allow checking shutdown flag
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let shared = shared.clone();

                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(stream, shared).await {
                            tracing::debug!("Mock server client error: {}", e);
                        }
                    });
                }
            }
        });

        Ok(server)
    }
}
