use core::fmt::{self, Display, Formatter};

use mailparse::MailAddr;

/// Verbs we recognise but deliberately do not offer on the inbound side.
const NOT_IMPLEMENTED: &[&str] = &[
    "STARTTLS", "AUTH", "VRFY", "EXPN", "HELP", "TURN", "ETRN", "BDAT",
];

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(id) => write!(f, "EHLO {id}"),
            Self::Helo(id) => write!(f, "HELO {id}"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// An empty `sender` is the null reverse-path `<>` from
    /// [RFC-5321](https://www.ietf.org/rfc/rfc5321.txt).
    MailFrom {
        sender: String,
        size: Option<usize>,
    },
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    /// A known verb this relay does not offer.
    NotImplemented(String),
    /// A known verb with broken arguments.
    Invalid(String),
    /// Not a verb we know.
    Unrecognised(String),
}

impl Command {
    /// Whether this command starts, extends or ends a mail transaction.
    pub const fn is_transactional(&self) -> bool {
        matches!(self, Self::MailFrom { .. } | Self::RcptTo(_) | Self::Data)
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => v.fmt(fmt),
            Self::MailFrom { sender, size } => {
                write!(fmt, "MAIL FROM:<{sender}>")?;
                if let Some(size) = size {
                    write!(fmt, " SIZE={size}")?;
                }
                Ok(())
            }
            Self::RcptTo(rcpt) => write!(fmt, "RCPT TO:<{rcpt}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::NotImplemented(s) | Self::Invalid(s) | Self::Unrecognised(s) => fmt.write_str(s),
        }
    }
}

/// Parse an SMTP path (`<user@host>`, or a bare address) into its address.
fn parse_path(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    let unbracketed = raw
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .unwrap_or(raw);

    if unbracketed.eq_ignore_ascii_case("postmaster") {
        return Ok(unbracketed.to_string());
    }

    let addresses = mailparse::addrparse(raw).map_err(|err| err.to_string())?;

    match addresses.first() {
        Some(MailAddr::Single(info)) if addresses.len() == 1 && info.addr.contains('@') => {
            Ok(info.addr.clone())
        }
        _ => Err(format!("Invalid address {raw}")),
    }
}

/// Pull the `SIZE=` value out of the `MAIL FROM` parameters, ignoring others.
fn parse_size(params: &str) -> Result<Option<usize>, String> {
    let mut size = None;

    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if !key.eq_ignore_ascii_case("SIZE") {
            continue;
        }

        if size.is_some() {
            return Err(String::from("Duplicate SIZE parameter"));
        }

        match value.parse::<usize>() {
            Ok(0) | Err(_) => return Err(format!("Invalid SIZE value: {value}")),
            Ok(value) => size = Some(value),
        }
    }

    Ok(size)
}

/// The remainder of `line` after `verb`, if `line` starts with it in any case.
fn strip_verb<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    if line.get(..verb.len())?.eq_ignore_ascii_case(verb) {
        line.get(verb.len()..)
    } else {
        None
    }
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_verb(trimmed, "MAIL FROM:") {
            let rest = rest.trim();
            let (path, params) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

            if path.is_empty() {
                return Err(Self::Invalid(String::from("Expected reverse-path")));
            }

            let size = parse_size(params).map_err(Self::Invalid)?;

            if path == "<>" {
                return Ok(Self::MailFrom {
                    sender: String::new(),
                    size,
                });
            }

            parse_path(path)
                .map(|sender| Self::MailFrom { sender, size })
                .map_err(Self::Invalid)
        } else if let Some(rest) = strip_verb(trimmed, "RCPT TO:") {
            let rest = rest.trim();
            let path = rest.split_whitespace().next().unwrap_or_default();

            if path.is_empty() || path == "<>" {
                return Err(Self::Invalid(String::from("Expected forward-path")));
            }

            parse_path(path).map(Self::RcptTo).map_err(Self::Invalid)
        } else {
            let (verb, argument) = trimmed
                .split_once(char::is_whitespace)
                .map_or((trimmed, ""), |(verb, arg)| (verb, arg.trim()));

            if verb.eq_ignore_ascii_case("EHLO") || verb.eq_ignore_ascii_case("HELO") {
                if argument.is_empty() {
                    return Err(Self::Invalid(format!("Expected hostname in {trimmed}")));
                }

                let id = argument.to_string();
                Ok(Self::Helo(if verb.eq_ignore_ascii_case("EHLO") {
                    HeloVariant::Ehlo(id)
                } else {
                    HeloVariant::Helo(id)
                }))
            } else if verb.eq_ignore_ascii_case("DATA") {
                Ok(Self::Data)
            } else if verb.eq_ignore_ascii_case("RSET") {
                Ok(Self::Rset)
            } else if verb.eq_ignore_ascii_case("NOOP") {
                Ok(Self::Noop)
            } else if verb.eq_ignore_ascii_case("QUIT") {
                Ok(Self::Quit)
            } else if NOT_IMPLEMENTED
                .iter()
                .any(|known| verb.eq_ignore_ascii_case(known))
            {
                Ok(Self::NotImplemented(verb.to_ascii_uppercase()))
            } else if verb.eq_ignore_ascii_case("MAIL") || verb.eq_ignore_ascii_case("RCPT") {
                Err(Self::Invalid(format!("Syntax error in {trimmed}")))
            } else {
                Err(Self::Unrecognised(trimmed.to_string()))
            }
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid(String::from("Unable to interpret command"))),
            Self::try_from,
        )
    }
}
