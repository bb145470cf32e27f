//! SMTP plumbing for the relay: the plaintext inbound acceptor and the
//! outbound client used to reach the upstream server.

pub mod client;
pub mod command;
pub mod connection;
pub mod handler;
pub mod listener;
pub mod session;

pub use handler::{HandlerFactory, SmtpTransactionHandler};
pub use listener::Listener;
pub use session::{Session, SessionConfig};
