//! Test support utilities for end-to-end tests

pub mod harness;
#[path = "../../../relay-delivery/tests/support/mock_server.rs"]
pub mod mock_server;

pub use harness::Harness;
pub use mock_server::{MockSmtpServer, SmtpCommand};
