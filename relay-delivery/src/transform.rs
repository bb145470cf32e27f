//! What gets sent upstream after `DATA`.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, MailParseError, ParsedMail};
use relay_common::{config::TransformStrategy, envelope::Envelope, tracing};

/// The content to transmit for `envelope` under `strategy`.
///
/// A message that cannot be parsed for [`TransformStrategy::Rebuild`] is
/// sent as received.
pub fn apply(strategy: TransformStrategy, envelope: &Envelope) -> Cow<'_, [u8]> {
    match strategy {
        TransformStrategy::PassThrough => Cow::Borrowed(envelope.body()),
        TransformStrategy::Rebuild => match rebuild(envelope, Utc::now()) {
            Ok(message) => Cow::Owned(message),
            Err(err) => {
                tracing::warn!(error = %err, "Unable to parse message, passing it through unchanged");
                Cow::Borrowed(envelope.body())
            }
        },
    }
}

/// Synthesize a plain text message from the envelope and the subject and
/// text of the original.
fn rebuild(envelope: &Envelope, date: DateTime<Utc>) -> Result<Vec<u8>, MailParseError> {
    let original = mailparse::parse_mail(envelope.body())?;

    let subject = original
        .headers
        .get_first_value("Subject")
        .map(|subject| subject.replace(['\r', '\n'], " "));
    let text = plain_text(&original)?;

    let mut message = String::with_capacity(text.len() + 256);

    if !envelope.sender().is_empty() {
        push_header(&mut message, "From", envelope.sender());
    }
    push_header(&mut message, "To", &envelope.recipients().join(", "));
    if let Some(subject) = subject {
        push_header(&mut message, "Subject", &subject);
    }
    push_header(&mut message, "Date", &date.to_rfc2822());
    push_header(&mut message, "MIME-Version", "1.0");
    push_header(&mut message, "Content-Type", "text/plain; charset=utf-8");
    push_header(&mut message, "Content-Transfer-Encoding", "8bit");
    message.push_str("\r\n");

    for line in text.lines() {
        message.push_str(line);
        message.push_str("\r\n");
    }

    Ok(message.into_bytes())
}

fn push_header(message: &mut String, name: &str, value: &str) {
    message.push_str(name);
    message.push_str(": ");
    message.push_str(value);
    message.push_str("\r\n");
}

/// The decoded body of the first `text/plain` part, or of the message
/// itself when it has none.
fn plain_text(mail: &ParsedMail<'_>) -> Result<String, MailParseError> {
    find_plain(mail).unwrap_or(mail).get_body()
}

fn find_plain<'a, 'b>(mail: &'a ParsedMail<'b>) -> Option<&'a ParsedMail<'b>> {
    if mail.subparts.is_empty() {
        return mail
            .ctype
            .mimetype
            .eq_ignore_ascii_case("text/plain")
            .then_some(mail);
    }

    mail.subparts.iter().find_map(find_plain)
}
