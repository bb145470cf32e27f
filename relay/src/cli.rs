use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use relay_common::{
    config::{ClientTimeouts, Credentials, RelayConfig, TlsMode, TransformStrategy, Upstream},
    error::ConfigError,
};
use relay_smtp::SessionConfig;

/// aiosmtpd's default, which existing deployments of this relay expect.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Startup settings. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay")]
#[command(about = "SMTP relay: plaintext inbound, authenticated TLS outbound", long_about = None)]
#[command(version)]
pub struct Args {
    /// Port to listen on for inbound mail
    #[arg(long, env = "RELAY_LISTEN_PORT")]
    pub listen_port: u16,

    /// Address to listen on for inbound mail
    #[arg(long, env = "RELAY_LISTEN_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_address: IpAddr,

    /// Upstream SMTP server
    #[arg(long, env = "RELAY_SMTP_HOST")]
    pub smtp_host: String,

    /// Upstream SMTP port. 465 always uses implicit TLS
    #[arg(long, env = "RELAY_SMTP_PORT", default_value_t = Upstream::DEFAULT_PORT)]
    pub smtp_port: u16,

    #[arg(long, env = "RELAY_SMTP_USER")]
    pub smtp_user: String,

    #[arg(long, env = "RELAY_SMTP_PASS", hide_env_values = true)]
    pub smtp_pass: String,

    /// Disable STARTTLS when sending upstream. Ignored with implicit TLS
    #[arg(long, env = "RELAY_NO_TLS_OUTBOUND")]
    pub no_tls_outbound: bool,

    /// Use implicit TLS instead of STARTTLS for upstream
    #[arg(long, env = "RELAY_SSL_OUTBOUND")]
    pub ssl_outbound: bool,

    /// Send a freshly built plain text message instead of the original
    #[arg(long, env = "RELAY_REBUILD_MESSAGE")]
    pub rebuild_message: bool,

    /// Do not verify the upstream certificate
    #[arg(long, env = "RELAY_INSECURE_TLS")]
    pub insecure_tls: bool,

    /// Name announced to the upstream in EHLO
    #[arg(long, env = "RELAY_HELO_NAME", default_value = "localhost")]
    pub helo_name: String,

    /// Largest inbound message in bytes, 0 for no limit
    #[arg(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Seconds allowed for connecting to the upstream
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT", default_value_t = 30)]
    pub connect_timeout: u64,

    /// Seconds allowed for each upstream command
    #[arg(long, env = "RELAY_COMMAND_TIMEOUT", default_value_t = 30)]
    pub command_timeout: u64,

    /// Seconds allowed for transferring the message upstream
    #[arg(long, env = "RELAY_DATA_TIMEOUT", default_value_t = 120)]
    pub data_timeout: u64,
}

impl Args {
    pub const fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    pub const fn tls_mode(&self) -> TlsMode {
        TlsMode::from_flags(self.smtp_port, self.no_tls_outbound, self.ssl_outbound)
    }

    /// The validated outbound configuration.
    ///
    /// # Errors
    /// When the flags describe an upstream that cannot be used.
    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let transform = if self.rebuild_message {
            TransformStrategy::Rebuild
        } else {
            TransformStrategy::PassThrough
        };

        let config = RelayConfig::new(
            Upstream::new(&self.smtp_host, self.smtp_port),
            Credentials::new(&self.smtp_user, &self.smtp_pass),
        )
        .with_tls(self.tls_mode())
        .with_accept_invalid_certs(self.insecure_tls)
        .with_transform(transform)
        .with_helo_name(&self.helo_name)
        .with_timeouts(
            ClientTimeouts::default()
                .with_connect_secs(self.connect_timeout)
                .with_command_secs(self.command_timeout)
                .with_data_secs(self.data_timeout),
        );

        config.validate()?;

        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .with_max_message_size(self.max_message_size)
            .build()
    }
}
