//! A relay running in-process, talked to with the crate's own SMTP client.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use relay::{cli::Args, controller::Controller};
use relay_common::Signal;
use relay_smtp::client::{Response, SmtpClient};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};

pub struct Harness {
    addr: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    server: JoinHandle<()>,
}

impl Harness {
    /// Start a relay on an ephemeral local port, forwarding in plaintext to
    /// `upstream_port` on the loopback interface.
    pub async fn start(upstream_port: u16, extra: &[&str]) -> Self {
        let upstream_port = upstream_port.to_string();
        let base = [
            "relay",
            "--listen-address",
            "127.0.0.1",
            "--listen-port",
            "0",
            "--smtp-host",
            "127.0.0.1",
            "--smtp-port",
            upstream_port.as_str(),
            "--smtp-user",
            "user",
            "--smtp-pass",
            "pass",
            "--no-tls-outbound",
            "--command-timeout",
            "5",
        ];
        let args = Args::try_parse_from(base.iter().chain(extra)).unwrap();

        let controller = Controller::bind(&args).await.unwrap();
        let addr = controller.local_addr().unwrap();

        let (shutdown, receiver) = broadcast::channel(4);
        let server = tokio::spawn(controller.serve(receiver));

        Self {
            addr,
            shutdown,
            server,
        }
    }

    /// A connection to the relay, past its greeting.
    pub async fn connect(&self) -> SmtpClient {
        let mut client = SmtpClient::connect("127.0.0.1", self.addr.port())
            .await
            .unwrap();

        let greeting = client.read_greeting().await.unwrap();
        assert_eq!(greeting.code, 220, "{greeting}");

        client
    }

    /// Run a whole transaction and return the reply to the message content.
    pub async fn send(&self, from: &str, to: &[&str], body: &str) -> Response {
        let mut client = self.connect().await;

        let (response, _) = client.ehlo("client.test").await.unwrap();
        assert_eq!(response.code, 250, "{response}");

        let response = client.mail_from(from, None).await.unwrap();
        assert_eq!(response.code, 250, "{response}");

        for recipient in to {
            let response = client.rcpt_to(recipient).await.unwrap();
            assert_eq!(response.code, 250, "{response}");
        }

        let response = client.data().await.unwrap();
        assert_eq!(response.code, 354, "{response}");

        let reply = client.send_data(body.as_bytes()).await.unwrap();

        let response = client.quit().await.unwrap();
        assert_eq!(response.code, 221, "{response}");

        reply
    }

    /// The listener may already be gone, so nobody listening is fine.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }

    /// Signal shutdown and wait for the relay to stop.
    pub async fn stop(self) {
        self.signal_shutdown();
        timeout(Duration::from_secs(5), self.server)
            .await
            .expect("relay did not stop")
            .unwrap();
    }
}
