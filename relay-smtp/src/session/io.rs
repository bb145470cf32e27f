use relay_common::{error::SessionError, incoming, internal, status::Status, tracing};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Session, State, response};
use crate::{connection::Line, handler::SmtpTransactionHandler};

/// Longest content line we buffer, far above the 1000 octets RFC 5321 allows.
const MAX_DATA_LINE: usize = 64 * 1024;

/// Whether `line` is the lone `.` that ends the content.
fn is_terminator(line: &[u8]) -> bool {
    matches!(line, b".\r\n" | b".\n")
}

/// Remove the transparency dot from a content line (RFC 5321 4.5.2).
fn unstuff(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}

impl<Stream, Handler> Session<Stream, Handler>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    Handler: SmtpTransactionHandler,
{
    /// Read message content up to the terminating `.` and hand it over.
    ///
    /// Returns `None` if the client went away first, in which case the
    /// transaction is dropped without ever reaching the handler.
    ///
    /// # Errors
    /// I/O failures, or the client going quiet for longer than the data timeout.
    #[tracing::instrument(skip_all)]
    pub(super) async fn receive_message(&mut self) -> Result<Option<Vec<String>>, SessionError> {
        let mut body = Vec::new();
        let mut oversized = false;
        let mut line_too_long = false;
        let timeout = self.config.timeouts.data();

        loop {
            let line = tokio::time::timeout(timeout, self.connection.read_line(MAX_DATA_LINE))
                .await
                .map_err(|_| {
                    tracing::warn!(peer = %self.peer, "Client timed out while sending content");
                    SessionError::Timeout(self.config.timeouts.data_secs)
                })??;

            match line {
                Line::Closed => {
                    self.handler.on_reset();
                    self.state = State::Closed;
                    return Ok(None);
                }
                Line::TooLong => line_too_long = true,
                Line::Complete(line) if is_terminator(&line) => break,
                Line::Complete(line) => {
                    let line = unstuff(&line);
                    if oversized || line_too_long {
                        continue;
                    }
                    if self.exceeds_size_limit(body.len() + line.len()) {
                        oversized = true;
                    } else {
                        body.extend_from_slice(line);
                    }
                }
            }
        }

        self.state = State::Greeted;

        if line_too_long {
            internal!(level = INFO, "Rejecting message with a line over {MAX_DATA_LINE} bytes");
            self.handler.on_reset();
            let (lines, _) = response::single(Status::CommandUnrecognised, "Line too long");
            return Ok(Some(lines));
        }

        if oversized {
            internal!(
                level = INFO,
                "Rejecting message over {} bytes",
                self.config.max_message_size
            );
            self.handler.on_reset();
            let (lines, _) = response::single(
                Status::ExceededStorage,
                "Message size exceeds fixed maximum message size",
            );
            return Ok(Some(lines));
        }

        incoming!("Received {} byte message", body.len());

        let reply = self.handler.on_data_complete(body).await;
        let (lines, _) = response::reply(&reply);
        Ok(Some(lines))
    }
}
