//! Exporter that ships finished spans to an OTLP/HTTP collector.

use prost::Message;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

use crate::config::TelemetryConfig;
use crate::telemetry::{OtlpBatch, SpanExporter, TelemetryRecord};

/// Header carrying the collector API key, when configured.
pub const API_KEY_HEADER: &str = "api-key";

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Queues records and posts finished spans as OTLP protobuf from a background task.
///
/// `endpoint` is the full traces URL, e.g. `http://collector:4318/v1/traces`.
///
/// Dropping every clone of the exporter closes the queue; the task flushes
/// what is left and exits.
#[derive(Debug, Clone)]
pub struct HttpExporter {
    tx: mpsc::UnboundedSender<TelemetryRecord>,
}

struct BatchSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExporter {
    /// Start the batching task. Must be called inside a Tokio runtime.
    pub fn spawn(endpoint: String, config: &TelemetryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.export_timeout_secs))
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let sender = BatchSender {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        };
        let batch_size = config.batch_size.max(1);
        let flush_every = Duration::from_millis(config.flush_interval_ms.max(1));

        tracing::info!(endpoint = %sender.endpoint, batch_size, "Telemetry http exporter started");
        tokio::spawn(run(sender, rx, batch_size, flush_every));

        Ok(Self { tx })
    }
}

impl SpanExporter for HttpExporter {
    fn export(&self, record: TelemetryRecord) {
        if self.tx.send(record).is_err() {
            tracing::debug!("Telemetry exporter task has stopped, dropping record");
        }
    }
}

async fn run(
    sender: BatchSender,
    mut rx: mpsc::UnboundedReceiver<TelemetryRecord>,
    batch_size: usize,
    flush_every: Duration,
) {
    let mut batch = OtlpBatch::new();
    let mut ticker = time::interval(flush_every);

    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    batch.push(record);
                    if batch.ready_len() >= batch_size {
                        sender.flush(&mut batch).await;
                    }
                }
                None => {
                    sender.flush(&mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                sender.flush(&mut batch).await;
            }
        }
    }

    tracing::debug!("Telemetry http exporter stopped");
}

impl BatchSender {
    async fn flush(&self, batch: &mut OtlpBatch) {
        let Some(export) = batch.take_request() else {
            return;
        };
        let spans: usize = export
            .resource_spans
            .iter()
            .flat_map(|r| &r.scope_spans)
            .map(|s| s.spans.len())
            .sum();

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .body(export.encode_to_vec());
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(spans, "Telemetry batch exported");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    spans,
                    "Telemetry collector rejected batch"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, spans, "Telemetry export failed");
            }
        }
    }
}
