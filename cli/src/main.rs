use anyhow::Context;
use azmgmt::commands::{self, Cli};
use azmgmt::{config, logger};
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    logger::setup_logger(config.logging(), cli.verbose).context("Failed to initialize logger")?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the pending call");
            trigger.cancel();
        }
    });

    commands::run(cli, config, cancel).await
}
