#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

use anyhow::Result;
use clap::Parser;
use iris_kernel::KernelConfig;
use iris_kernel::cli::{Cli, dispatch};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => KernelConfig::load_from_path(path)?,
        None => KernelConfig::load_or_init()?,
    };

    // Initialize logging
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level)
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    dispatch(cli, config).await
}
