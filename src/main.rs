// Telemetry ingestor - main.rs
// Bootstrap: logging, CLI parsing, dispatch

use clap::Parser;
use std::process::exit;
use telemetry_ingestor::cli::{dispatch, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_ingestor=info,telemetry=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dispatch(Cli::parse()) {
        eprintln!("{e:#}");
        exit(1);
    }
}
