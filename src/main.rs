//! trace-relay server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────────┐
//!   POST /trace   │  ┌─────────┐   ┌─────────────┐   ┌─────────┐              │
//!   ──────────────┼─▶│ ingress │──▶│ queue relay │──▶│ compute │──┐           │
//!   traceparent   │  └─────────┘   └─────────────┘   └─────────┘  │           │
//!                 │                                               ▼           │
//!                 │                     ┌────────┐   ┌────────┐               │
//!                 │   completed ◀───────│ step B │◀──│ step A │               │
//!                 │   (traceChain)      └────────┘   └────────┘               │
//!                 │                                                           │
//!                 │  each hop: continue_or_start → work → insert_carrier      │
//!                 │            → append result slot → hand off                │
//!                 │                                                           │
//!                 │  cross-cutting: config · telemetry · logging · metrics    │
//!                 └───────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use trace_relay::config::load_or_default;
use trace_relay::lifecycle::{shutdown_on_signal, Shutdown};
use trace_relay::observability::{logging, metrics};
use trace_relay::stages::StageWork;
use trace_relay::{telemetry, HttpServer, Workers};

#[derive(Parser)]
#[command(name = "trace-relay", version, about = "Trace propagation pipeline server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TRACE_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "trace-relay starting");
    tracing::info!(
        bind_address = %config.ingress.bind_address,
        queue_url = %config.transports.queue_url,
        job_queue = %config.transports.job_queue,
        state_machine = %config.transports.state_machine_arn,
        exporter = ?config.telemetry.exporter,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let tracer = telemetry::build(&config.telemetry)?;
    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let workers = Workers::spawn(
        &config,
        tracer,
        StageWork::simulated(&config.work),
        &shutdown,
        None,
    );

    let listener = TcpListener::bind(&config.ingress.bind_address).await?;
    let server = HttpServer::new(&config, workers.ingress.clone());
    server.run(listener, shutdown).await?;

    workers.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
