//! Test support utilities for relay tests

pub mod mock_server;

pub use mock_server::{MockSmtpServer, SmtpCommand};
