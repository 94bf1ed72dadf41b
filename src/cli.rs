use crate::app_state::AppState;
use crate::config::IngestorConfig;
use crate::config_loader::load_config;
use crate::delivery::{BatchGuard, Delivery};
use crate::log_event::LogEvent;
use crate::pipeline::IngestPipeline;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Top-level CLI interface for the ingestor
#[derive(Parser)]
#[command(
    name = "ingestor",
    version,
    about = "Telemetry ingestor backed by locked JSON accumulator files"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP ingestion API
    Serve {
        /// Host/IP to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to bind
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest a JSON array of events from a file, or `-` for stdin
    Ingest { input: String },

    /// Export whatever is pending in a free accumulator. Never creates one.
    Flush,

    /// Print the effective configuration
    Config,
}

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            with_runtime(|| serve(config))
        }
        Commands::Ingest { input } => with_runtime(|| ingest_file(config, input)),
        Commands::Flush => with_runtime(|| flush(config)),
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render config as TOML")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn with_runtime<F, Fut>(task: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;
    rt.block_on(task())
}

/// Build the delivery sink and the pipeline sharing one batch guard.
fn open_pipeline(config: &IngestorConfig) -> anyhow::Result<(Arc<IngestPipeline>, Arc<Delivery>)> {
    let guard: BatchGuard = Arc::new(Mutex::new(()));
    let delivery = Arc::new(Delivery::from_config(
        &config.delivery,
        config.layout(),
        guard.clone(),
        tokio::runtime::Handle::current(),
    ));
    let pipeline = IngestPipeline::open(config, guard, delivery.clone())
        .context("Failed to initialise accumulator")?;
    Ok((Arc::new(pipeline), delivery))
}

async fn serve(config: IngestorConfig) -> anyhow::Result<()> {
    let (pipeline, delivery) = open_pipeline(&config)?;
    let app = crate::web::build_router(Arc::new(AppState::new(pipeline)));

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("Server error")?;

    delivery.wait_idle().await;
    Ok(())
}

async fn ingest_file(config: IngestorConfig, input: String) -> anyhow::Result<()> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read events from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&input).with_context(|| format!("Failed to read {input}"))?
    };
    let events: Vec<LogEvent> =
        serde_json::from_str(&raw).context("Input must be a JSON array of events")?;

    let (pipeline, delivery) = open_pipeline(&config)?;
    let worker = pipeline.clone();
    let (exports, pending) = tokio::task::spawn_blocking(move || {
        let mut exports = 0usize;
        let mut pending = 0usize;
        for event in &events {
            let receipt = worker.ingest(event)?;
            exports += usize::from(receipt.exported.is_some());
            pending = receipt.pending;
        }
        Ok::<_, crate::errors::IngestError>((exports, pending))
    })
    .await
    .context("Ingest task failed")??;

    delivery.wait_idle().await;
    println!(
        "Ingested into {}: {} export(s), {} pending",
        pipeline.identity(),
        exports,
        pending
    );
    Ok(())
}

async fn flush(config: IngestorConfig) -> anyhow::Result<()> {
    let guard: BatchGuard = Arc::new(Mutex::new(()));
    let delivery = Arc::new(Delivery::from_config(
        &config.delivery,
        config.layout(),
        guard.clone(),
        tokio::runtime::Handle::current(),
    ));
    let Some(pipeline) = IngestPipeline::open_existing(&config, guard, delivery.clone())
        .context("Failed to open accumulator")?
    else {
        println!("No free accumulator to flush");
        return Ok(());
    };

    let pipeline = Arc::new(pipeline);
    let worker = pipeline.clone();
    let report = tokio::task::spawn_blocking(move || worker.flush())
        .await
        .context("Flush task failed")??;
    delivery.wait_idle().await;

    match report {
        Some(report) => println!(
            "Exported {} record(s) to {}",
            report.exported,
            report.batch_path.display()
        ),
        None => println!("Nothing pending in {}", pipeline.identity()),
    }
    Ok(())
}
