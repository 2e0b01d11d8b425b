use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::{
    error::{IngestError, StudioResult},
    orchestrator::{RunId, engine::LogLevel},
    storage::{StorageClient, with_retries},
};

/// Cap on one ingested log body; excess is dropped behind a marker line.
pub const LOG_BODY_CAP: usize = 50_000;

/// Queue depth per partition worker.
const PARTITION_QUEUE_DEPTH: usize = 1_024;

// ================================================================================================
// Wire records
// ================================================================================================

/// One time-series sample pushed by a training worker. Appended per run in
/// arrival order; the `step` field is stored as given, even out of order.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub run_id: RunId,
    pub step: u64,
    pub reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_loss: Option<f64>,
    #[serde_as(as = "serde_with::TimestampMilliSeconds<i64>")]
    pub wall_clock: DateTime<Utc>,
}

/// One log batch pushed by a training worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub run_id: RunId,
    #[serde(default)]
    pub log_level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ================================================================================================
// Ingestion service
// ================================================================================================

enum Job {
    Metric(MetricPoint),
    Logs(LogBatch),
    Flush(oneshot::Sender<()>),
}

/// Accepts metric points and log batches from running workers.
///
/// Ingestion acks as soon as the record is enqueued; storage fan-out is
/// at-least-once and happens on partition workers. Writes for one run always
/// land on the same partition, which preserves per-run append order while
/// different runs proceed fully concurrently.
pub struct IngestService {
    partitions: Vec<mpsc::Sender<Job>>,
}

impl IngestService {
    pub fn new(storage: Arc<dyn StorageClient>, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let senders = (0..partitions)
            .map(|index| {
                let (tx, rx) = mpsc::channel(PARTITION_QUEUE_DEPTH);
                tokio::spawn(partition_worker(index, rx, storage.clone()));
                tx
            })
            .collect();
        Self { partitions: senders }
    }

    /// Accepts one metric point. Returns once the record is durably queued.
    pub async fn ingest_metric(&self, point: MetricPoint) -> StudioResult<()> {
        if point.run_id.as_str().is_empty() {
            return Err(IngestError::RejectedMetric("empty runId".to_string()).into());
        }
        if !point.reward.is_finite() {
            return Err(IngestError::RejectedMetric("non-finite reward".to_string()).into());
        }
        self.enqueue(&point.run_id.clone(), Job::Metric(point)).await
    }

    /// Accepts one log batch, capping oversized bodies.
    pub async fn ingest_logs(&self, mut batch: LogBatch) -> StudioResult<()> {
        if batch.run_id.as_str().is_empty() {
            return Err(IngestError::RejectedLogs("empty runId".to_string()).into());
        }
        batch.message = cap_message(batch.message);
        self.enqueue(&batch.run_id.clone(), Job::Logs(batch)).await
    }

    /// Blocks until every record enqueued so far has been fanned out.
    pub async fn flush(&self) {
        let mut receivers = Vec::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            let (tx, rx) = oneshot::channel();
            if partition.send(Job::Flush(tx)).await.is_ok() {
                receivers.push(rx);
            }
        }
        futures::future::join_all(receivers).await;
    }

    async fn enqueue(&self, run_id: &RunId, job: Job) -> StudioResult<()> {
        let partition = &self.partitions[self.partition_of(run_id)];
        partition
            .send(job)
            .await
            .map_err(|_| IngestError::QueueClosed.into())
    }

    fn partition_of(&self, run_id: &RunId) -> usize {
        let mut hasher = DefaultHasher::new();
        run_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }
}

async fn partition_worker(
    index: usize,
    mut rx: mpsc::Receiver<Job>,
    storage: Arc<dyn StorageClient>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Metric(point) => {
                let args = match serde_json::to_value(&point) {
                    Ok(args) => args,
                    Err(e) => {
                        error!(partition = index, error = %e, "unencodable metric dropped");
                        continue;
                    }
                };
                let result = with_retries("ingest.metric", || {
                    storage.mutation("metrics/append", args.clone())
                })
                .await;
                if let Err(e) = result {
                    warn!(partition = index, run_id = %point.run_id, error = %e,
                        "metric point dropped after retries");
                }
            }
            Job::Logs(batch) => {
                let args = match serde_json::to_value(&batch) {
                    Ok(args) => args,
                    Err(e) => {
                        error!(partition = index, error = %e, "unencodable log batch dropped");
                        continue;
                    }
                };
                let result = with_retries("ingest.logs", || {
                    storage.mutation("logs/append", args.clone())
                })
                .await;
                if let Err(e) = result {
                    warn!(partition = index, run_id = %batch.run_id, error = %e,
                        "log batch dropped after retries");
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn cap_message(message: String) -> String {
    if message.len() <= LOG_BODY_CAP {
        return message;
    }
    let cut = message.len() - LOG_BODY_CAP;
    let tail = match message[cut..].find('\n') {
        Some(nl) => &message[cut + nl + 1..],
        None => &message[cut..],
    };
    format!("... (truncated, showing last {} chars)\n{tail}", tail.len())
}
