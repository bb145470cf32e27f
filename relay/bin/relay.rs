#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use clap::Parser;
use relay::{cli::Args, controller::Controller};
use relay_common::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init();

    Controller::bind(&args).await?.run().await
}
