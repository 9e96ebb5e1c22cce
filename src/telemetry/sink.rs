//! Telemetry sink
//!
//! The dispatcher and state machine hand points to a [`TelemetrySink`] and
//! move on; durability is the writer task's problem. A bounded queue sits
//! between them. A single consumer drains it, so per-identity write order
//! equals event order. Write failures are logged and counted, never fed
//! back into protocol handling.

use std::sync::Arc;

use async_trait::async_trait;
use influxdb2::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::ChargerRecord;
use crate::support::errors::TelemetryError;

use super::point::{LogEntry, TelemetryPoint};

/// What to do when the telemetry queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Await queue capacity. Suspends the issuing call briefly; never blocks
    /// on the durable commit itself.
    #[default]
    Block,
    /// Discard the new point with a warning.
    Drop,
}

/// Append-only writer of structured points, fire-and-forget for callers.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn append_log(&self, entry: LogEntry) -> Result<(), TelemetryError>;
    async fn upsert_charger(&self, record: ChargerRecord) -> Result<(), TelemetryError>;
}

// ── Queued sink ────────────────────────────────────────────────

/// Sink half of the bounded queue. Cheap to clone.
#[derive(Clone)]
pub struct QueuedTelemetrySink {
    tx: mpsc::Sender<TelemetryPoint>,
    policy: OverflowPolicy,
}

impl QueuedTelemetrySink {
    /// Build the queue and spawn the writer task draining it into `writer`.
    ///
    /// The writer exits after the last sink clone is dropped and the queue
    /// has drained, so awaiting the handle is the final flush.
    pub fn spawn(
        writer: Arc<dyn LineWriter>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_writer(rx, writer));
        (Self { tx, policy }, handle)
    }

    async fn enqueue(&self, point: TelemetryPoint) -> Result<(), TelemetryError> {
        match self.policy {
            OverflowPolicy::Block => self
                .tx
                .send(point)
                .await
                .map_err(|_| TelemetryError::QueueClosed),
            OverflowPolicy::Drop => match self.tx.try_send(point) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(point)) => {
                    warn!(identity = point.identity(), "telemetry queue full, dropping point");
                    metrics::counter!("telemetry_points_dropped_total").increment(1);
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(TelemetryError::QueueClosed),
            },
        }
    }
}

#[async_trait]
impl TelemetrySink for QueuedTelemetrySink {
    async fn append_log(&self, entry: LogEntry) -> Result<(), TelemetryError> {
        self.enqueue(TelemetryPoint::Log(entry)).await
    }

    async fn upsert_charger(&self, record: ChargerRecord) -> Result<(), TelemetryError> {
        self.enqueue(TelemetryPoint::ChargerState(record)).await
    }
}

/// Writer loop: drain the queue, batch what is immediately available,
/// write. A failed write is reported and the batch is abandoned: protocol
/// state, not the store, is the source of truth for the live session.
async fn run_writer(mut rx: mpsc::Receiver<TelemetryPoint>, writer: Arc<dyn LineWriter>) {
    const MAX_BATCH: usize = 128;

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(point) => batch.push(point),
                Err(_) => break,
            }
        }

        let lines = batch
            .iter()
            .map(TelemetryPoint::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        match writer.write_lines(&lines).await {
            Ok(()) => {
                debug!(points = batch.len(), writer = writer.name(), "telemetry batch written");
                metrics::counter!("telemetry_points_written_total").increment(batch.len() as u64);
            }
            Err(e) => {
                error!(
                    points = batch.len(),
                    writer = writer.name(),
                    error = %e,
                    "telemetry write failed"
                );
                metrics::counter!("telemetry_write_failures_total").increment(1);
            }
        }
    }

    debug!(writer = writer.name(), "telemetry writer drained, exiting");
}

// ── Line writers ───────────────────────────────────────────────

/// Destination for rendered line-protocol batches.
#[async_trait]
pub trait LineWriter: Send + Sync {
    async fn write_lines(&self, lines: &str) -> Result<(), TelemetryError>;
    fn name(&self) -> &str;
}

/// InfluxDB 2.x destination.
pub struct InfluxLineWriter {
    client: Client,
    org: String,
    bucket: String,
}

impl InfluxLineWriter {
    pub fn new(url: &str, org: &str, bucket: &str, token: &str) -> Self {
        Self {
            client: Client::new(url, org, token),
            org: org.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Health probe for startup logging. Failure is not fatal; the server
    /// runs degraded and the writer keeps reporting per batch.
    pub async fn ping(&self) -> Result<(), TelemetryError> {
        self.client
            .health()
            .await
            .map(|_| ())
            .map_err(|e| TelemetryError::WriteFailed(format!("health check failed: {e}")))
    }
}

#[async_trait]
impl LineWriter for InfluxLineWriter {
    async fn write_lines(&self, lines: &str) -> Result<(), TelemetryError> {
        self.client
            .write_line_protocol(&self.org, &self.bucket, lines.to_string())
            .await
            .map_err(|e| TelemetryError::WriteFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}
