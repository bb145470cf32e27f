use std::{io, net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use relay_common::{Signal, error::ListenerError, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use crate::{
    handler::HandlerFactory,
    session::{Session, SessionConfig},
};

/// The inbound TCP listener. Every accepted connection runs as its own task.
pub struct Listener<Factory: HandlerFactory> {
    listener: TcpListener,
    factory: Arc<Factory>,
    config: Arc<SessionConfig>,
}

impl<Factory: HandlerFactory> Listener<Factory> {
    /// Bind `socket` without accepting anything yet.
    ///
    /// # Errors
    /// If the address cannot be bound.
    pub async fn bind(
        socket: SocketAddr,
        factory: Factory,
        config: SessionConfig,
    ) -> Result<Self, ListenerError> {
        let listener =
            TcpListener::bind(socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: socket.to_string(),
                    source,
                })?;

        Ok(Self {
            listener,
            factory: Arc::new(factory),
            config: Arc::new(config),
        })
    }

    /// The address actually bound, useful when binding port 0.
    ///
    /// # Errors
    /// If the socket has gone away.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, then wait for every
    /// session still running to finish.
    #[tracing::instrument(skip_all)]
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) {
        let address = self
            .local_addr()
            .map_or_else(|_| String::from("<unknown>"), |addr| addr.to_string());
        internal!(level = INFO, "Listening on {address}");

        let mut sessions: Vec<JoinHandle<()>> = Vec::default();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    internal!(
                        level = INFO,
                        "Listener {address} received shutdown signal, finishing {} sessions ...",
                        sessions.len()
                    );
                    join_all(sessions).await;
                    break;
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            internal!(level = WARN, "Failed to accept connection: {err}");
                            continue;
                        }
                    };

                    tracing::debug!("Connection received on {address} from {peer}");
                    sessions.retain(|session| !session.is_finished());

                    let session = Session::create(
                        stream,
                        peer,
                        self.factory.create(peer),
                        Arc::clone(&self.config),
                    );
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(signal).await {
                            if err.is_timeout() {
                                internal!(level = INFO, "Session with {peer} ended: {err}");
                            } else {
                                internal!(level = WARN, "Session with {peer} failed: {err}");
                            }
                        }
                    }));
                }
            }
        }

        internal!(level = INFO, "Listener {address} stopped");
    }
}
