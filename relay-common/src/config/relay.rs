use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::timeouts::ClientTimeouts;
use crate::error::ConfigError;

/// How the outbound connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plaintext for the whole session.
    None,
    /// Plaintext greeting, then an in-place upgrade via `STARTTLS`.
    #[default]
    StartTls,
    /// TLS handshake before the first SMTP byte.
    ImplicitTls,
}

impl TlsMode {
    /// The submissions port, which always speaks implicit TLS.
    pub const IMPLICIT_TLS_PORT: u16 = 465;

    /// Derive the policy from the two startup flags.
    ///
    /// Implicit TLS is chosen when asked for or when `port` is 465, and in
    /// that case `disable_starttls` is ignored.
    pub const fn from_flags(port: u16, disable_starttls: bool, implicit_tls: bool) -> Self {
        if implicit_tls || port == Self::IMPLICIT_TLS_PORT {
            Self::ImplicitTls
        } else if disable_starttls {
            Self::None
        } else {
            Self::StartTls
        }
    }

    pub const fn is_encrypted(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Display for TlsMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::StartTls => "starttls",
            Self::ImplicitTls => "implicit-tls",
        })
    }
}

/// What gets sent upstream after `DATA`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformStrategy {
    /// The inbound bytes, untouched.
    #[default]
    PassThrough,
    /// A freshly synthesized message carrying the original subject and text.
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub host: String,
    #[serde(default = "Upstream::default_port")]
    pub port: u16,
}

impl Upstream {
    pub const DEFAULT_PORT: u16 = 587;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    const fn default_port() -> u16 {
        Self::DEFAULT_PORT
    }
}

impl Display for Upstream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Upstream login. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the outbound leg needs, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub upstream: Upstream,
    pub credentials: Credentials,
    #[serde(default)]
    pub tls: TlsMode,
    /// Skip certificate verification. Only meant for self-signed upstreams.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub transform: TransformStrategy,
    /// Name announced in our EHLO/HELO.
    #[serde(default = "RelayConfig::default_helo_name")]
    pub helo_name: String,
    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl RelayConfig {
    pub fn new(upstream: Upstream, credentials: Credentials) -> Self {
        Self {
            tls: TlsMode::from_flags(upstream.port, false, false),
            upstream,
            credentials,
            accept_invalid_certs: false,
            transform: TransformStrategy::default(),
            helo_name: Self::default_helo_name(),
            timeouts: ClientTimeouts::default(),
        }
    }

    #[must_use]
    pub const fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub const fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn with_transform(mut self, transform: TransformStrategy) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reject settings that cannot possibly reach an upstream.
    ///
    /// # Errors
    /// The first offending field, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.host.trim().is_empty() {
            return Err(ConfigError::MissingField("upstream host"));
        }

        if self.upstream.port == 0 {
            return Err(ConfigError::Invalid {
                field: "upstream port",
                reason: String::from("must be between 1 and 65535"),
            });
        }

        if self.credentials.username.is_empty() {
            return Err(ConfigError::MissingField("username"));
        }

        if self.helo_name.trim().is_empty() {
            return Err(ConfigError::MissingField("helo name"));
        }

        Ok(())
    }

    fn default_helo_name() -> String {
        String::from("localhost")
    }
}
