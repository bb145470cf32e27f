//! Timeouts for both legs of the relay.
//!
//! [`ServerTimeouts`] bound how long an inbound client may stall us, while
//! [`ClientTimeouts`] bound every suspension point of an outbound relay
//! attempt. A slow upstream therefore ends in a failed relay, never a hung
//! session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inbound (acceptor side) timeouts, following RFC 5321 section 4.5.3.2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Waiting for the next command line.
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Waiting for the next chunk of message content after `354`.
    ///
    /// Default: 180 seconds
    #[serde(default = "defaults::server_data_secs")]
    pub data_secs: u64,

    /// Hard cap on the lifetime of one inbound connection.
    ///
    /// Default: 1800 seconds
    #[serde(default = "defaults::server_connection_secs")]
    pub connection_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_secs: defaults::server_data_secs(),
            connection_secs: defaults::server_connection_secs(),
        }
    }
}

impl ServerTimeouts {
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }
}

/// Outbound (upstream side) timeouts, one per suspension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// TCP connect, including name resolution.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_connect_secs")]
    pub connect_secs: u64,

    /// Greeting and EHLO/HELO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub ehlo_secs: u64,

    /// STARTTLS command and either TLS handshake.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub tls_secs: u64,

    /// The whole AUTH exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub mail_from_secs: u64,

    /// Applied to each recipient separately.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub rcpt_to_secs: u64,

    /// `DATA`, the message content and the final reply.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::client_data_secs")]
    pub data_secs: u64,

    /// Expiry only produces a warning.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::client_quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::client_connect_secs(),
            ehlo_secs: defaults::client_command_secs(),
            tls_secs: defaults::client_command_secs(),
            auth_secs: defaults::client_command_secs(),
            mail_from_secs: defaults::client_command_secs(),
            rcpt_to_secs: defaults::client_command_secs(),
            data_secs: defaults::client_data_secs(),
            quit_secs: defaults::client_quit_secs(),
        }
    }
}

impl ClientTimeouts {
    /// Apply one value to every single-command exchange (EHLO, TLS, AUTH,
    /// MAIL FROM, RCPT TO).
    #[must_use]
    pub const fn with_command_secs(mut self, secs: u64) -> Self {
        self.ehlo_secs = secs;
        self.tls_secs = secs;
        self.auth_secs = secs;
        self.mail_from_secs = secs;
        self.rcpt_to_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_connect_secs(mut self, secs: u64) -> Self {
        self.connect_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_data_secs(mut self, secs: u64) -> Self {
        self.data_secs = secs;
        self
    }

    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub const fn ehlo(&self) -> Duration {
        Duration::from_secs(self.ehlo_secs)
    }

    pub const fn tls(&self) -> Duration {
        Duration::from_secs(self.tls_secs)
    }

    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    pub const fn mail_from(&self) -> Duration {
        Duration::from_secs(self.mail_from_secs)
    }

    pub const fn rcpt_to(&self) -> Duration {
        Duration::from_secs(self.rcpt_to_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300 // 5 minutes
    }
    pub const fn server_data_secs() -> u64 {
        180 // 3 minutes
    }
    pub const fn server_connection_secs() -> u64 {
        1800 // 30 minutes
    }

    pub const fn client_connect_secs() -> u64 {
        30
    }
    pub const fn client_command_secs() -> u64 {
        30
    }
    pub const fn client_data_secs() -> u64 {
        120 // 2 minutes
    }
    pub const fn client_quit_secs() -> u64 {
        10
    }
}
