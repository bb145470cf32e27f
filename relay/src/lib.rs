//! Plaintext SMTP in, authenticated and encrypted SMTP out.
//!
//! The binary is a thin shell around [`controller::Controller`], which wires
//! the inbound listener to the outbound relay using the settings parsed by
//! [`cli::Args`].

pub mod cli;
pub mod controller;
