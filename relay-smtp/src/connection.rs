use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Read buffer size for inbound connections.
const BUFFER_SIZE: usize = 8192;

/// Outcome of reading one CRLF (or bare LF) terminated line.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// The line, including its terminator.
    Complete(Vec<u8>),
    /// The line was longer than allowed. Its bytes were consumed and dropped.
    TooLong,
    /// The peer closed the connection. Any unterminated tail is discarded.
    Closed,
}

/// Buffered, line oriented view of an inbound stream.
pub struct Connection<Stream> {
    stream: BufReader<Stream>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: BufReader::with_capacity(BUFFER_SIZE, stream),
        }
    }

    /// Read the next line, refusing to buffer more than `limit` bytes of it.
    ///
    /// # Errors
    /// Any I/O error from the underlying stream.
    pub async fn read_line(&mut self, limit: usize) -> io::Result<Line> {
        let mut line = Vec::new();
        let mut overflowed = false;

        loop {
            let (used, terminated) = {
                let available = self.stream.fill_buf().await?;
                if available.is_empty() {
                    return Ok(Line::Closed);
                }

                let (chunk, terminated) = available
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or((available, false), |end| (&available[..=end], true));

                if !overflowed {
                    if line.len() + chunk.len() > limit {
                        overflowed = true;
                        line = Vec::new();
                    } else {
                        line.extend_from_slice(chunk);
                    }
                }

                (chunk.len(), terminated)
            };

            self.stream.consume(used);

            if terminated {
                return Ok(if overflowed {
                    Line::TooLong
                } else {
                    Line::Complete(line)
                });
            }
        }
    }

    /// Write `lines`, each CRLF terminated, in a single flush.
    ///
    /// # Errors
    /// Any I/O error from the underlying stream.
    pub async fn send<S: AsRef<str> + Send + Sync>(&mut self, lines: &[S]) -> io::Result<()> {
        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(line.as_ref());
            buffer.push_str("\r\n");
        }

        let stream = self.stream.get_mut();
        stream.write_all(buffer.as_bytes()).await?;
        stream.flush().await
    }
}
