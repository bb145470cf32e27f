//! SASL mechanisms for `AUTH` (RFC 4954).

use core::fmt::{self, Display, Formatter};

use base64::{Engine, engine::general_purpose::STANDARD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// RFC 4616, sent as an initial response.
    Plain,
    /// The de facto `LOGIN` exchange: username and password, one 334 each.
    Login,
}

impl Mechanism {
    /// Pick the mechanism to use from what the server advertised, preferring
    /// `PLAIN`.
    pub fn select<S: AsRef<str>>(advertised: &[S]) -> Option<Self> {
        let offers = |name: &str| advertised.iter().any(|m| m.as_ref().eq_ignore_ascii_case(name));

        if offers("PLAIN") {
            Some(Self::Plain)
        } else if offers("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        })
    }
}

/// `authzid NUL authcid NUL passwd` with an empty authorization identity.
pub(super) fn plain_token(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

pub(super) fn encode(value: &str) -> String {
    STANDARD.encode(value)
}
