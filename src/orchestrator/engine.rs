use std::{
    sync::{Arc, OnceLock, atomic::{AtomicBool, Ordering}},
    time::Duration,
};

use chrono::Utc;
use dashmap::DashMap;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{OrchestratorError, StudioResult},
    orchestrator::{
        ComputeBackend, JobId, LogChunk, Run, RunConfig, RunId, RunStatus, StatusReport,
        WorkloadManifest,
    },
    storage::{StorageClient, with_retries, with_retries_best_effort},
};

/// Per-call deadlines against the compute backend.
pub const STATUS_DEADLINE: Duration = Duration::from_secs(30);
pub const LOGS_DEADLINE: Duration = Duration::from_secs(60);
pub const LAUNCH_DEADLINE: Duration = Duration::from_secs(300);
pub const CANCEL_DEADLINE: Duration = Duration::from_secs(30);

/// Lines per persisted log-stream record.
pub const LOG_BATCH_LINES: usize = 100;
/// Cap on a synced log body; older content is dropped behind a marker line.
pub const LOG_BODY_CAP: usize = 50_000;
/// How much log tail a metadata sync pulls.
const SYNC_LOG_LINES: usize = 1_000;

// ================================================================================================
// Log level heuristics
// ================================================================================================

/// Severity assigned to a synced log batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Debug,
    #[default]
    Info,
}

/// Keyword classification of a log batch, error first.
pub fn classify_level(message: &str) -> LogLevel {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)error|failed|exception",
            r"(?i)warn",
            r"(?i)debug",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    });
    let matches = patterns.matches(message);
    if matches.matched(0) {
        LogLevel::Error
    } else if matches.matched(1) {
        LogLevel::Warning
    } else if matches.matched(2) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

// ================================================================================================
// Orchestrator
// ================================================================================================

/// Supervises training runs: compiles configs into workload manifests,
/// launches them, and keeps one status-poll task per active run. Launch and
/// polling never block each other; shared run state lives behind the run
/// map.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn ComputeBackend>,
    storage: Arc<dyn StorageClient>,
    storage_url: String,
    poll_interval: Duration,
    runs: DashMap<RunId, Run>,
    setup_attempted: AtomicBool,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        storage: Arc<dyn StorageClient>,
        storage_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                storage,
                storage_url: storage_url.into(),
                poll_interval: Duration::from_secs(5),
                runs: DashMap::new(),
                setup_attempted: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            backend: self.inner.backend.clone(),
            storage: self.inner.storage.clone(),
            storage_url: self.inner.storage_url.clone(),
            poll_interval,
            runs: DashMap::new(),
            setup_attempted: AtomicBool::new(false),
            shutdown: self.inner.shutdown.clone(),
        });
        Self { inner }
    }

    /// Stops every poll task. Pending storage writes finish on their own.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn run(&self, run_id: &RunId) -> Option<Run> {
        self.inner.runs.get(run_id).map(|r| r.clone())
    }

    pub fn run_by_job(&self, job_id: &JobId) -> Option<Run> {
        self.inner
            .runs
            .iter()
            .find(|r| &r.job_id == job_id)
            .map(|r| r.clone())
    }

    /// Launches a run. Idempotent over `run_id`: a second call while the
    /// run is still live returns the existing job id.
    #[tracing::instrument(skip(self, config), fields(run_id = %run_id))]
    pub async fn launch(&self, run_id: RunId, config: &RunConfig) -> StudioResult<JobId> {
        if let Some(existing) = self.run(&run_id) {
            if existing.status.is_terminal() {
                return Err(OrchestratorError::Launch(format!(
                    "run '{run_id}' already finished as {}",
                    existing.status
                ))
                .into());
            }
            info!(job_id = %existing.job_id, "launch is idempotent; returning existing job");
            return Ok(existing.job_id);
        }

        self.inner.ensure_backend_ready().await;

        let manifest = WorkloadManifest::from_run_config(&run_id, config, &self.inner.storage_url);
        let manifest_path = manifest.write_to_temp(&run_id).await?;
        debug!(?manifest_path, "manifest spooled");

        let submit = with_retries("orchestrator.launch", || {
            deadline("launch", LAUNCH_DEADLINE, self.inner.backend.submit(&manifest))
        })
        .await;

        let job_id = match submit {
            Ok(job_id) => job_id,
            Err(e) => {
                self.inner
                    .persist_run_update(&run_id, serde_json::json!({
                        "runId": run_id.as_str(),
                        "status": RunStatus::Failed.to_string(),
                        "error": e.to_string(),
                    }))
                    .await;
                return Err(OrchestratorError::Launch(e.to_string()).into());
            }
        };

        let run = Run {
            run_id: run_id.clone(),
            job_id: job_id.clone(),
            status: RunStatus::Pending,
            progress: None,
            resources: None,
            duration: None,
            cost: None,
            last_log_update: None,
        };
        self.inner.runs.insert(run_id.clone(), run);
        self.inner
            .persist_run_update(&run_id, serde_json::json!({
                "runId": run_id.as_str(),
                "jobId": job_id.as_str(),
                "status": RunStatus::Pending.to_string(),
                "submittedAt": Utc::now().timestamp_millis(),
            }))
            .await;

        info!(
            job_id = %job_id,
            poll = %humantime::format_duration(self.inner.poll_interval),
            "run launched; status poll starting"
        );
        self.spawn_poll(run_id);
        Ok(job_id)
    }

    /// Queries the backend for a job's status. Failures come back as
    /// `status = error` in the report so callers can keep polling.
    pub async fn get_status(&self, job_id: &JobId) -> StatusReport {
        self.inner.checked_status(job_id).await
    }

    /// Last `max_lines` lines of a job's logs, tagged when truncated.
    pub async fn get_logs(&self, job_id: &JobId, max_lines: usize) -> StudioResult<LogChunk> {
        let chunk = with_retries("orchestrator.logs", || {
            deadline("logs", LOGS_DEADLINE, self.inner.backend.logs(job_id, max_lines))
        })
        .await?;
        Ok(tail_chunk(chunk, max_lines))
    }

    /// Cancels a job. Cancelling an already-terminal run acknowledges
    /// without touching the backend.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel(&self, job_id: &JobId) -> StudioResult<()> {
        if let Some(run) = self.run_by_job(job_id)
            && run.status.is_terminal()
        {
            debug!(status = %run.status, "cancel on terminal run is a no-op");
            return Ok(());
        }

        with_retries("orchestrator.cancel", || {
            deadline("cancel", CANCEL_DEADLINE, self.inner.backend.cancel(job_id))
        })
        .await
        .map_err(|e| OrchestratorError::Cancel {
            job_id: job_id.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(run) = self.run_by_job(job_id) {
            let _ = self.apply_status(&run.run_id, RunStatus::Cancelled).await;
        }
        Ok(())
    }

    /// Merges a status observed from a worker callback or the poll loop.
    /// Backward transitions are rejected; same-status writes are no-ops.
    pub async fn apply_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
    ) -> StudioResult<RunStatus> {
        let merged = {
            let mut entry = self
                .inner
                .runs
                .get_mut(run_id)
                .ok_or_else(|| OrchestratorError::UnknownRun(run_id.to_string()))?;
            if entry.status == status {
                return Ok(status);
            }
            if !entry.status.can_transition_to(status) {
                return Err(OrchestratorError::IllegalTransition {
                    from: entry.status.to_string(),
                    to: status.to_string(),
                }
                .into());
            }
            entry.status = status;
            if status == RunStatus::Succeeded {
                entry.progress = Some(1.0);
            }
            entry.status
        };

        self.inner
            .persist_run_update(run_id, serde_json::json!({
                "runId": run_id.as_str(),
                "status": merged.to_string(),
            }))
            .await;
        Ok(merged)
    }

    /// One metadata sync pass for a run: pull status and logs, persist both.
    /// Exposed for tests; the poll task calls this on its interval.
    pub async fn sync_metadata(&self, run_id: &RunId) -> StudioResult<RunStatus> {
        self.inner.sync_metadata(run_id).await
    }

    fn spawn_poll(&self, run_id: RunId) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the first sync should
            // wait a full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match inner.sync_metadata(&run_id).await {
                    Ok(status) if status.is_terminal() => {
                        info!(run_id = %run_id, %status, "run reached terminal status; poll stopping");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // The run vanished from the map; nothing left to poll.
                        warn!(run_id = %run_id, error = %e, "status poll stopping");
                        break;
                    }
                }
            }
        });
    }
}

impl Inner {
    async fn ensure_backend_ready(&self) {
        match self.backend.is_ready().await {
            Ok(true) => return,
            Ok(false) => {
                if !self.setup_attempted.swap(true, Ordering::SeqCst) {
                    info!("compute backend not configured; attempting one-shot setup");
                    if let Err(e) = self.backend.setup().await {
                        warn!(error = %e, "backend setup attempt failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "backend readiness probe failed"),
        }
        if !matches!(self.backend.is_ready().await, Ok(true)) {
            warn!("no compute provider ready; launch will surface the backend diagnostic");
        }
    }

    async fn checked_status(&self, job_id: &JobId) -> StatusReport {
        let result = deadline("status", STATUS_DEADLINE, self.backend.status(job_id)).await;
        match result {
            Ok(report) => report,
            Err(e) => StatusReport::error(e.to_string()),
        }
    }

    async fn sync_metadata(&self, run_id: &RunId) -> StudioResult<RunStatus> {
        let (job_id, current) = {
            let entry = self
                .runs
                .get(run_id)
                .ok_or_else(|| OrchestratorError::UnknownRun(run_id.to_string()))?;
            (entry.job_id.clone(), entry.status)
        };

        let report = self.checked_status(&job_id).await;
        let merged = match report.status.as_run_status() {
            Some(next) if current.can_transition_to(next) => {
                if let Some(mut entry) = self.runs.get_mut(run_id) {
                    entry.status = next;
                    entry.resources = report.resources.clone().or(entry.resources.take());
                    entry.duration = report.duration.clone().or(entry.duration.take());
                    entry.cost = report.cost.or(entry.cost);
                    entry.progress = if next == RunStatus::Succeeded {
                        Some(1.0)
                    } else {
                        report.progress.or(entry.progress)
                    };
                    entry.last_log_update = Some(Utc::now().timestamp_millis());
                }
                next
            }
            Some(stale) => {
                debug!(%stale, %current, "ignoring backward status from provider");
                current
            }
            None => current,
        };

        let mut update = serde_json::json!({
            "runId": run_id.as_str(),
            "status": merged.to_string(),
            "lastLogUpdate": Utc::now().timestamp_millis(),
        });
        if let Some(obj) = update.as_object_mut() {
            if let Some(resources) = &report.resources {
                obj.insert("resources".to_string(), resources.clone());
            }
            if let Some(duration) = &report.duration {
                obj.insert("duration".to_string(), serde_json::json!(duration));
            }
            if let Some(cost) = report.cost {
                obj.insert("cost".to_string(), serde_json::json!(cost));
            }
            if merged == RunStatus::Succeeded {
                obj.insert("progress".to_string(), serde_json::json!(1.0));
            }
        }
        self.persist_run_update(run_id, update).await;

        let logs = deadline("logs", LOGS_DEADLINE, self.backend.logs(&job_id, SYNC_LOG_LINES)).await;
        match logs {
            Ok(chunk) if !chunk.logs.is_empty() => {
                self.persist_log_batches(run_id, &chunk.logs).await;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "log pull failed; will retry next sync"),
        }

        Ok(merged)
    }

    /// Splits a log body into ~100-line records with level classification
    /// and appends them to the run's log stream. Failures degrade silently.
    async fn persist_log_batches(&self, run_id: &RunId, logs: &str) {
        let capped = cap_log_body(logs);
        let lines: Vec<&str> = capped.lines().collect();
        let total_batches = lines.len().div_ceil(LOG_BATCH_LINES).max(1);

        for (index, batch) in lines.chunks(LOG_BATCH_LINES).enumerate() {
            let message = batch.join("\n");
            let level = classify_level(&message);
            let args = serde_json::json!({
                "runId": run_id.as_str(),
                "logLevel": level.to_string(),
                "message": message,
                "metadata": {
                    "batch": index + 1,
                    "totalBatches": total_batches,
                },
            });
            let result = with_retries_best_effort("orchestrator.sync_logs", || {
                self.storage.mutation("logs/append", args.clone())
            })
            .await;
            if result.is_none() {
                debug!(run_id = %run_id, batch = index + 1, "log batch dropped");
                return;
            }
        }
    }

    async fn persist_run_update(&self, run_id: &RunId, args: serde_json::Value) {
        let result = with_retries_best_effort("orchestrator.sync_status", || {
            self.storage.mutation("runs/update", args.clone())
        })
        .await;
        if result.is_none() {
            debug!(run_id = %run_id, "run metadata update dropped");
        }
    }
}

// ================================================================================================
// Helpers
// ================================================================================================

async fn deadline<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = StudioResult<T>>,
) -> StudioResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout {
            op,
            deadline: limit,
        }
        .into()),
    }
}

fn tail_chunk(chunk: LogChunk, max_lines: usize) -> LogChunk {
    let lines: Vec<&str> = chunk.logs.lines().collect();
    if lines.len() <= max_lines {
        return LogChunk {
            line_count: lines.len(),
            ..chunk
        };
    }
    let tail = lines[lines.len() - max_lines..].join("\n");
    LogChunk {
        logs: tail,
        line_count: max_lines,
        truncated: true,
    }
}

fn cap_log_body(logs: &str) -> String {
    if logs.len() <= LOG_BODY_CAP {
        return logs.to_string();
    }
    let cut = logs.len() - LOG_BODY_CAP;
    // Keep whole lines after the cut.
    let tail = match logs[cut..].find('\n') {
        Some(nl) => &logs[cut + nl + 1..],
        None => &logs[cut..],
    };
    format!("... (truncated, showing last {} chars)\n{tail}", tail.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StorageError, storage::MemoryStorageClient};
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex};

    /// Scripted backend: statuses pop in order, the last one repeats.
    struct FakeBackend {
        statuses: Mutex<VecDeque<StatusReport>>,
        logs: Mutex<String>,
        submitted: Mutex<Vec<WorkloadManifest>>,
        cancelled: Mutex<Vec<JobId>>,
        fail_submit: bool,
    }

    impl FakeBackend {
        fn with_statuses(statuses: Vec<crate::orchestrator::ReportedStatus>) -> Self {
            Self {
                statuses: Mutex::new(
                    statuses
                        .into_iter()
                        .map(|status| StatusReport {
                            status,
                            ..StatusReport::default()
                        })
                        .collect(),
                ),
                logs: Mutex::new(String::new()),
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
                fail_submit: false,
            }
        }
    }

    #[async_trait]
    impl ComputeBackend for FakeBackend {
        async fn is_ready(&self) -> StudioResult<bool> {
            Ok(true)
        }

        async fn setup(&self) -> StudioResult<()> {
            Ok(())
        }

        async fn submit(&self, manifest: &WorkloadManifest) -> StudioResult<JobId> {
            if self.fail_submit {
                return Err(StorageError::client_side("compute", "no capacity").into());
            }
            self.submitted.lock().unwrap().push(manifest.clone());
            Ok(JobId::from("job-1"))
        }

        async fn status(&self, _job: &JobId) -> StudioResult<StatusReport> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap_or_default())
            } else {
                Ok(statuses.front().cloned().unwrap_or_default())
            }
        }

        async fn logs(&self, _job: &JobId, _max_lines: usize) -> StudioResult<LogChunk> {
            let logs = self.logs.lock().unwrap().clone();
            Ok(LogChunk {
                line_count: logs.lines().count(),
                logs,
                truncated: false,
            })
        }

        async fn cancel(&self, job: &JobId) -> StudioResult<()> {
            self.cancelled.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn orchestrator(backend: FakeBackend) -> (Orchestrator, Arc<MemoryStorageClient>) {
        let storage = Arc::new(MemoryStorageClient::new());
        // A long interval keeps the poll task quiet while tests drive
        // sync_metadata by hand.
        let orchestrator = Orchestrator::new(Arc::new(backend), storage.clone(), "https://db")
            .with_poll_interval(Duration::from_secs(3_600));
        (orchestrator, storage)
    }

    #[tokio::test]
    async fn launch_records_the_pending_run() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, storage) =
            orchestrator(FakeBackend::with_statuses(vec![ReportedStatus::Pending]));
        let job = orchestrator
            .launch(RunId::from("run-1"), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(job, JobId::from("job-1"));
        let row = storage.row("runs", "run-1").unwrap();
        assert_eq!(row["status"], "pending");
        assert_eq!(row["jobId"], "job-1");
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn launch_is_idempotent_for_live_runs() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, _storage) =
            orchestrator(FakeBackend::with_statuses(vec![ReportedStatus::Running]));
        let first = orchestrator
            .launch(RunId::from("run-1"), &RunConfig::default())
            .await
            .unwrap();
        let second = orchestrator
            .launch(RunId::from("run-1"), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(first, second);
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn failed_launch_marks_the_run_failed() {
        use crate::orchestrator::ReportedStatus;
        let mut backend = FakeBackend::with_statuses(vec![ReportedStatus::Pending]);
        backend.fail_submit = true;
        let (orchestrator, storage) = orchestrator(backend);
        let err = orchestrator
            .launch(RunId::from("run-1"), &RunConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ORCHESTRATOR_ERROR");
        let row = storage.row("runs", "run-1").unwrap();
        assert_eq!(row["status"], "failed");
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn sync_follows_the_provider_lifecycle_in_order() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, storage) = orchestrator(FakeBackend::with_statuses(vec![
            ReportedStatus::Pending,
            ReportedStatus::Running,
            ReportedStatus::Succeeded,
        ]));
        let run_id = RunId::from("run-1");
        orchestrator
            .launch(run_id.clone(), &RunConfig::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        loop {
            let status = orchestrator.sync_metadata(&run_id).await.unwrap();
            if seen.last() != Some(&status) {
                seen.push(status);
            }
            if status.is_terminal() {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![RunStatus::Pending, RunStatus::Running, RunStatus::Succeeded]
        );

        let run = orchestrator.run(&run_id).unwrap();
        assert_eq!(run.progress, Some(1.0));
        let row = storage.row("runs", "run-1").unwrap();
        assert_eq!(row["status"], "succeeded");
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn backward_provider_statuses_are_ignored() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, _storage) = orchestrator(FakeBackend::with_statuses(vec![
            ReportedStatus::Running,
            ReportedStatus::Pending,
            ReportedStatus::Pending,
        ]));
        let run_id = RunId::from("run-1");
        orchestrator
            .launch(run_id.clone(), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(
            orchestrator.sync_metadata(&run_id).await.unwrap(),
            RunStatus::Running
        );
        // Provider regressed to pending; the machine holds at running.
        assert_eq!(
            orchestrator.sync_metadata(&run_id).await.unwrap(),
            RunStatus::Running
        );
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn cancel_after_terminal_is_an_ack_without_backend_call() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, _storage) = orchestrator(FakeBackend::with_statuses(vec![
            ReportedStatus::Succeeded,
            ReportedStatus::Succeeded,
        ]));
        let run_id = RunId::from("run-1");
        let job = orchestrator
            .launch(run_id.clone(), &RunConfig::default())
            .await
            .unwrap();
        orchestrator.sync_metadata(&run_id).await.unwrap();
        assert_eq!(
            orchestrator.run(&run_id).unwrap().status,
            RunStatus::Succeeded
        );
        orchestrator.cancel(&job).await.unwrap();
        assert_eq!(
            orchestrator.run(&run_id).unwrap().status,
            RunStatus::Succeeded
        );
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn worker_status_updates_obey_the_partial_order() {
        use crate::orchestrator::ReportedStatus;
        let (orchestrator, _storage) =
            orchestrator(FakeBackend::with_statuses(vec![ReportedStatus::Pending]));
        let run_id = RunId::from("run-1");
        orchestrator
            .launch(run_id.clone(), &RunConfig::default())
            .await
            .unwrap();

        orchestrator
            .apply_status(&run_id, RunStatus::Running)
            .await
            .unwrap();
        orchestrator
            .apply_status(&run_id, RunStatus::Succeeded)
            .await
            .unwrap();
        let err = orchestrator
            .apply_status(&run_id, RunStatus::Running)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ORCHESTRATOR_ERROR");
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn log_sync_batches_and_classifies() {
        use crate::orchestrator::ReportedStatus;
        let backend = FakeBackend::with_statuses(vec![ReportedStatus::Running]);
        *backend.logs.lock().unwrap() = (0..150)
            .map(|i| {
                if i == 140 {
                    "Exception: training crashed".to_string()
                } else {
                    format!("step {i} loss 0.1")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let (orchestrator, storage) = orchestrator(backend);
        let run_id = RunId::from("run-1");
        orchestrator
            .launch(run_id.clone(), &RunConfig::default())
            .await
            .unwrap();
        orchestrator.sync_metadata(&run_id).await.unwrap();

        let batches = storage.list("logs", "run-1");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0]["logLevel"], "info");
        assert_eq!(batches[1]["logLevel"], "error");
        assert_eq!(batches[0]["metadata"]["totalBatches"], 2);
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn get_logs_tails_and_tags_truncation() {
        use crate::orchestrator::ReportedStatus;
        let backend = FakeBackend::with_statuses(vec![ReportedStatus::Running]);
        *backend.logs.lock().unwrap() =
            (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let (orchestrator, _storage) = orchestrator(backend);
        let run_id = RunId::from("run-1");
        let job = orchestrator
            .launch(run_id, &RunConfig::default())
            .await
            .unwrap();

        let chunk = orchestrator.get_logs(&job, 5).await.unwrap();
        assert!(chunk.truncated);
        assert_eq!(chunk.line_count, 5);
        assert!(chunk.logs.starts_with("line 15"));
        orchestrator.shutdown();
    }

    #[test]
    fn level_heuristics_match_keywords() {
        assert_eq!(classify_level("Exception: boom"), LogLevel::Error);
        assert_eq!(classify_level("job FAILED"), LogLevel::Error);
        assert_eq!(classify_level("Warning: slow"), LogLevel::Warning);
        assert_eq!(classify_level("debug: cache hit"), LogLevel::Debug);
        assert_eq!(classify_level("step 10 reward 0.5"), LogLevel::Info);
    }

    #[test]
    fn log_cap_keeps_the_tail_behind_a_marker() {
        let body = "x".repeat(LOG_BODY_CAP * 2);
        let capped = cap_log_body(&body);
        assert!(capped.starts_with("... (truncated"));
        assert!(capped.len() < body.len());
    }
}
