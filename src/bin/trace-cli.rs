use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

use trace_relay::config::load_or_default;
use trace_relay::observability::logging;
use trace_relay::propagation::{CarriedContext, TRACEPARENT};
use trace_relay::stages::{IngressRequest, StageWork};
use trace_relay::{telemetry, LocalPipeline};

#[derive(Parser)]
#[command(name = "trace-cli")]
#[command(about = "Drive and inspect the trace-relay pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a message to a running ingress with a fresh traceparent header
    Send {
        #[arg(short, long, default_value = "http://localhost:8080/trace")]
        url: String,

        #[arg(short, long, default_value = "Hello from trace-cli")]
        message: String,

        /// Raw JSON body; overrides --message
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Run all five stages in-process and print the final envelope
    Local {
        #[arg(short, long, default_value = "Hello from trace-cli")]
        message: String,

        #[arg(short, long)]
        data: Option<String>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip the simulated work delays
        #[arg(long)]
        no_delay: bool,
    },
    /// Print a locally originated trace context
    Test,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send { url, message, data } => {
            let context = CarriedContext::originate();
            println!("traceparent: {}", context.traceparent());

            let res = reqwest::Client::new()
                .post(&url)
                .header(TRACEPARENT, context.traceparent())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body(&message, data))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Local {
            message,
            data,
            config,
            no_delay,
        } => {
            let mut config = load_or_default(config.as_deref())?;
            if no_delay {
                config.work.compute_ms = 0;
                config.work.step_a_ms = 0;
                config.work.step_b_ms = 0;
            }
            logging::init(&config.observability)?;

            let tracer = telemetry::build(&config.telemetry)?;
            let pipeline = LocalPipeline::new(&config, tracer, StageWork::simulated(&config.work));
            let run = pipeline
                .run(IngressRequest {
                    method: "POST".to_string(),
                    path: "/trace".to_string(),
                    headers: Vec::new(),
                    body: Some(body(&message, data)),
                })
                .await?;

            if let Some(done) = run.final_envelope() {
                println!("{}", serde_json::to_string_pretty(&done.to_value()?)?);
            }
        }
        Commands::Test => {
            let context = CarriedContext::originate();
            let out = json!({
                "traceId": context.trace_id.to_string(),
                "spanId": context.span_id.to_string(),
                "traceparent": context.traceparent(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn body(message: &str, data: Option<String>) -> String {
    data.unwrap_or_else(|| {
        json!({
            "message": message,
            "timestamp": chrono::Utc::now(),
        })
        .to_string()
    })
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: ingress returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
