use std::{
    io,
    net::SocketAddr,
    sync::{Arc, LazyLock},
};

use relay_common::{Signal, internal};
use relay_delivery::{OutboundRelay, RelayFactory};
use relay_smtp::Listener;
use tokio::sync::broadcast;

use crate::cli::Args;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for `SIGINT` or `SIGTERM`, then tell everyone to stop.
#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| io::Error::new(io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// The running relay: one inbound listener feeding one outbound relay.
pub struct Controller {
    listener: Listener<RelayFactory<OutboundRelay>>,
}

impl Controller {
    /// Validate the configuration and bind the inbound listener.
    ///
    /// # Errors
    ///
    /// If the configuration is unusable or the listen address cannot be bound.
    pub async fn bind(args: &Args) -> anyhow::Result<Self> {
        let config = args.relay_config()?;

        internal!(
            level = INFO,
            "Relaying to {} as {} using {}",
            config.upstream,
            config.credentials.username,
            config.tls
        );
        if config.accept_invalid_certs {
            tracing::warn!(
                upstream = %config.upstream,
                "SECURITY WARNING: TLS certificate validation is disabled for the upstream"
            );
        }

        let relay = OutboundRelay::new(Arc::new(config));
        let listener = Listener::bind(
            args.listen_address(),
            RelayFactory::new(Arc::new(relay)),
            args.session_config(),
        )
        .await?;

        Ok(Self { listener })
    }

    /// # Errors
    /// If the socket has gone away.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `signal` fires and every session has finished.
    pub async fn serve(self, signal: broadcast::Receiver<Signal>) {
        self.listener.serve(signal).await;
    }

    /// Serve until the process is asked to stop.
    ///
    /// # Errors
    ///
    /// If signal handlers cannot be installed or the listener task panics.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn run(self) -> anyhow::Result<()> {
        let server = tokio::spawn(self.serve(SHUTDOWN_BROADCAST.subscribe()));

        shutdown().await?;
        server.await?;

        internal!(level = INFO, "Shutdown complete");

        Ok(())
    }
}
