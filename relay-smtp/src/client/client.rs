//! SMTP client implementation with support for implicit TLS and STARTTLS.

use relay_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

use super::{
    Capabilities, Mechanism, auth,
    error::{ClientError, Result},
    response::Response,
    tls,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, host: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = tls::connector(accept_invalid_certs)?;
                let server_name = tls::server_name(host)?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(String::from(
                "Connection is already TLS",
            ))),
        }
    }
}

/// A single upstream SMTP connection.
///
/// Nothing is read or written on connect, which lets the caller decide
/// whether TLS comes before the greeting (implicit TLS) or after it
/// (`STARTTLS`).
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    host: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Opens a plain TCP connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if name resolution or the connection fails.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            host: host.to_string(),
            accept_invalid_certs: false,
        })
    }

    /// Sets whether to accept invalid TLS certificates.
    ///
    /// Default is `false`. Only meant for upstreams with self-signed certificates.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// Performs a TLS handshake on the connection as it stands.
    ///
    /// Called straight after [`connect`](Self::connect) for implicit TLS,
    /// or by [`starttls`](Self::starttls) once the server agreed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::TlsError` if the handshake fails.
    pub async fn upgrade_to_tls(&mut self) -> Result<()> {
        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;

        let connection = connection
            .upgrade_to_tls(&self.host, self.accept_invalid_certs)
            .await?;

        // Anything buffered before the handshake was plaintext
        self.buffer_pos = 0;
        self.connection = Some(connection);

        Ok(())
    }

    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{line}\r\n").as_bytes())
            .await
    }

    /// Sends a raw command and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.send_line(command).await?;
        self.read_response().await
    }

    /// Like [`command`](Self::command), but keeps `command` out of the logs.
    async fn secret_command(&mut self, command: &str, shown: &str) -> Result<Response> {
        outgoing!("{shown}");
        self.send_line(command).await?;
        self.read_response().await
    }

    /// Sends EHLO and reads the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<(Response, Capabilities)> {
        let response = self.command(&format!("EHLO {domain}")).await?;
        let capabilities = if response.is_success() {
            Capabilities::from_ehlo(&response)
        } else {
            Capabilities::default()
        };
        Ok((response, capabilities))
    }

    /// Sends HELO with the specified domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Sends `STARTTLS` and, if the server agrees, upgrades the connection.
    ///
    /// The server's reply is returned either way; on refusal the connection
    /// is left as it was.
    ///
    /// # Errors
    ///
    /// Returns an error if the command or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            self.upgrade_to_tls().await?;
        }

        Ok(response)
    }

    /// Runs the `AUTH` exchange for `mechanism` and returns the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange cannot be completed on the wire.
    pub async fn authenticate(
        &mut self,
        mechanism: Mechanism,
        username: &str,
        password: &str,
    ) -> Result<Response> {
        match mechanism {
            Mechanism::Plain => {
                let token = auth::plain_token(username, password);
                let response = self
                    .secret_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>")
                    .await?;

                // An empty challenge asks for the initial response again
                if response.code == 334 {
                    return self.secret_command(&token, "<redacted>").await;
                }

                Ok(response)
            }
            Mechanism::Login => {
                let response = self.command("AUTH LOGIN").await?;
                if response.code != 334 {
                    return Ok(response);
                }

                let response = self
                    .secret_command(&auth::encode(username), "<username>")
                    .await?;
                if response.code != 334 {
                    return Ok(response);
                }

                self.secret_command(&auth::encode(password), "<redacted>")
                    .await
            }
        }
    }

    /// Sends MAIL FROM, declaring `size` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str, size: Option<usize>) -> Result<Response> {
        let cmd = if let Some(sz) = size {
            format!("MAIL FROM:<{from}> SIZE={sz}")
        } else {
            format!("MAIL FROM:<{from}>")
        };
        self.command(&cmd).await
    }

    /// Sends RCPT TO command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends DATA command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message content, dot-stuffed and terminated, and reads the
    /// server's verdict on it.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, body: &[u8]) -> Result<Response> {
        let payload = dot_stuff(body);
        outgoing!("<{} bytes of message content>", payload.len());

        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(&payload)
            .await?;

        self.read_response().await
    }

    /// Sends QUIT command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Reads a complete SMTP response from the server.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{response}");
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Apply RFC 5321 4.5.2 transparency and append the end-of-data marker.
///
/// A body not ending in a line break gets a CRLF first, so the terminator
/// always sits on a line of its own.
pub fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 5);
    let mut line_start = true;

    for &byte in body {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");

    tracing::trace!(original = body.len(), stuffed = out.len(), "Prepared message content");
    out
}
