use relay_common::{error::ProtocolError, incoming, status::Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Event, Response, Session, State, response};
use crate::{
    command::{Command, HeloVariant},
    handler::SmtpTransactionHandler,
};

impl<Stream, Handler> Session<Stream, Handler>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    Handler: SmtpTransactionHandler,
{
    /// Parse one command line and work out the reply.
    pub(super) fn handle_command(&mut self, received: &[u8]) -> Response {
        let command = Command::try_from(received).unwrap_or_else(|e| e);

        incoming!("{command}");

        if command.is_transactional() && self.state == State::Connect {
            return response::single(Status::InvalidCommandSequence, "Send HELO/EHLO first");
        }

        match command {
            Command::Helo(variant) => {
                self.handler.on_reset();
                self.state = State::Greeted;

                match variant {
                    HeloVariant::Ehlo(id) => self.ehlo_response(&id),
                    HeloVariant::Helo(id) => self.helo_response(&id),
                }
            }
            Command::MailFrom { sender, size } => {
                if self.exceeds_size_limit(size.unwrap_or_default()) {
                    return response::single(
                        Status::ExceededStorage,
                        "Message size exceeds fixed maximum message size",
                    );
                }

                Self::accepted(self.handler.on_mail_from(&sender))
            }
            Command::RcptTo(recipient) => Self::accepted(self.handler.on_rcpt_to(&recipient)),
            Command::Data => match self.handler.on_data_start() {
                Ok(()) => {
                    self.state = State::Reading;
                    response::single(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
                }
                Err(err) => Self::rejected(err),
            },
            Command::Rset => {
                self.handler.on_reset();
                response::single(Status::Ok, "Ok")
            }
            Command::Noop => response::single(Status::Ok, "Ok"),
            Command::Quit => {
                self.state = State::Closed;
                (
                    vec![format!("{} Bye", Status::GoodBye)],
                    Event::ConnectionClose,
                )
            }
            Command::NotImplemented(_) => {
                response::single(Status::NotImplemented, "Command not implemented")
            }
            Command::Invalid(reason) => (
                vec![format!("{} {reason}", Status::SyntaxError)],
                Event::ConnectionKeepAlive,
            ),
            Command::Unrecognised(_) => {
                response::single(Status::CommandUnrecognised, "Command unrecognised")
            }
        }
    }

    pub(super) fn exceeds_size_limit(&self, size: usize) -> bool {
        self.config.max_message_size > 0 && size > self.config.max_message_size
    }

    fn accepted(result: Result<(), ProtocolError>) -> Response {
        result.map_or_else(Self::rejected, |()| response::single(Status::Ok, "Ok"))
    }

    fn rejected(err: ProtocolError) -> Response {
        (
            vec![format!("{} {err}", Status::InvalidCommandSequence)],
            Event::ConnectionKeepAlive,
        )
    }
}
