use relay_common::status::{Reply, Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Event, Response, Session};
use crate::handler::SmtpTransactionHandler;

pub(super) fn single(status: Status, message: &'static str) -> Response {
    (
        vec![Reply::new(status, message).to_string()],
        Event::ConnectionKeepAlive,
    )
}

pub(super) fn reply(reply: &Reply) -> Response {
    (vec![reply.to_string()], Event::ConnectionKeepAlive)
}

/// Format `lines` as one reply, using `code-` on all but the last line.
fn multiline(status: Status, lines: &[String]) -> Vec<String> {
    let last = lines.len().saturating_sub(1);
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            if idx == last {
                format!("{status} {line}")
            } else {
                format!("{status}-{line}")
            }
        })
        .collect()
}

impl<Stream, Handler> Session<Stream, Handler>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    Handler: SmtpTransactionHandler,
{
    pub(super) fn ehlo_response(&self, id: &str) -> Response {
        let lines = [
            format!("{} greets {id}", self.config.banner),
            format!("SIZE {}", self.config.max_message_size),
            String::from("8BITMIME"),
        ];

        (multiline(Status::Ok, &lines), Event::ConnectionKeepAlive)
    }

    pub(super) fn helo_response(&self, id: &str) -> Response {
        (
            vec![format!("{} {} greets {id}", Status::Ok, self.config.banner)],
            Event::ConnectionKeepAlive,
        )
    }
}
