use std::{process::Stdio, sync::OnceLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
    error::{OrchestratorError, StorageError, StudioResult},
    orchestrator::{
        ComputeBackend, JobId, LogChunk, ReportedStatus, StatusReport, WorkloadManifest,
    },
};

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const LOGS_TIMEOUT: Duration = Duration::from_secs(60);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Compute backend that shells out to the SkyPilot CLI.
///
/// Managed jobs (`sky jobs launch`) recover spot preemptions on their own,
/// so this adapter only submits, polls the queue, tails logs, and cancels.
#[derive(Debug, Default, Clone)]
pub struct SkyCliBackend;

impl SkyCliBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> StudioResult<std::process::Output> {
        let child = Command::new("sky")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(OrchestratorError::BackendUnavailable(format!(
                "sky CLI not runnable: {e}"
            ))
            .into()),
            Err(_) => Err(OrchestratorError::Timeout {
                op: "sky",
                deadline: timeout,
            }
            .into()),
        }
    }
}

#[async_trait]
impl ComputeBackend for SkyCliBackend {
    async fn is_ready(&self) -> StudioResult<bool> {
        let version = self.run(&["--version"], VERSION_TIMEOUT).await;
        let Ok(output) = version else {
            return Ok(false);
        };
        if !output.status.success() {
            return Ok(false);
        }

        let check = self.run(&["check"], CHECK_TIMEOUT).await?;
        let stdout = String::from_utf8_lossy(&check.stdout).to_lowercase();
        let any_cloud = ["aws", "amazon", "gcp", "google", "azure", "microsoft"]
            .iter()
            .any(|cloud| stdout.contains(cloud));
        Ok(any_cloud)
    }

    async fn setup(&self) -> StudioResult<()> {
        // `sky check` re-detects credentials from the environment.
        let output = self.run(&["check"], CHECK_TIMEOUT).await?;
        info!(
            status = %output.status,
            "sky check completed: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn submit(&self, manifest: &WorkloadManifest) -> StudioResult<JobId> {
        let dir = std::env::temp_dir().join("simstudio-jobs");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::Manifest(format!("spool dir: {e}")))?;
        let path = dir.join(format!("{}.yaml", manifest.name));
        tokio::fs::write(&path, manifest.to_yaml()?)
            .await
            .map_err(|e| OrchestratorError::Manifest(format!("write {path:?}: {e}")))?;

        let path_str = path.to_string_lossy().to_string();
        let output = self
            .run(
                &["jobs", "launch", "-y", "-n", &manifest.name, &path_str],
                LAUNCH_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let diagnostic = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(StorageError::client_side("compute", diagnostic.trim().to_string()).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = extract_job_id(&stdout).unwrap_or_else(|| {
            warn!(name = %manifest.name, "could not extract a job id; falling back to the job name");
            manifest.name.clone()
        });
        info!(job_id, "managed job launched");
        Ok(JobId::new(job_id))
    }

    async fn status(&self, job: &JobId) -> StudioResult<StatusReport> {
        let output = self.run(&["jobs", "queue"], QUEUE_TIMEOUT).await?;
        if !output.status.success() {
            return Ok(StatusReport::error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().find(|line| line.contains(job.as_str())) else {
            return Ok(StatusReport {
                status: ReportedStatus::NotFound,
                ..StatusReport::default()
            });
        };

        let mut report = StatusReport {
            status: parse_queue_status(line),
            ..StatusReport::default()
        };
        if let Some(re) = accelerator_regex()
            && let Some(capture) = re.captures(line)
        {
            report.resources = Some(serde_json::json!({
                "accelerator": format!("{}:{}", &capture[1], &capture[2]),
            }));
        }
        if let Some(re) = duration_regex()
            && let Some(capture) = re.captures(line)
        {
            report.duration = Some(capture[0].to_string());
        }
        Ok(report)
    }

    async fn logs(&self, job: &JobId, max_lines: usize) -> StudioResult<LogChunk> {
        let output = self
            .run(&["jobs", "logs", "--no-follow", job.as_str()], LOGS_TIMEOUT)
            .await?;
        if !output.status.success() {
            return Err(StorageError::service(
                "compute",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }

        let logs = String::from_utf8_lossy(&output.stdout).to_string();
        let lines: Vec<&str> = logs.lines().collect();
        if lines.len() <= max_lines {
            return Ok(LogChunk {
                line_count: lines.len(),
                logs,
                truncated: false,
            });
        }
        Ok(LogChunk {
            logs: lines[lines.len() - max_lines..].join("\n"),
            line_count: max_lines,
            truncated: true,
        })
    }

    async fn cancel(&self, job: &JobId) -> StudioResult<()> {
        let output = self
            .run(&["jobs", "cancel", "-y", job.as_str()], QUEUE_TIMEOUT)
            .await?;
        if !output.status.success() {
            return Err(StorageError::service(
                "compute",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Pulls a job id out of the launcher's output: an explicit `Job ID:` line
/// first, a UUID anywhere in the output second.
fn extract_job_id(stdout: &str) -> Option<String> {
    static ID_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    static UUID: OnceLock<Option<Regex>> = OnceLock::new();

    let id_line = ID_LINE
        .get_or_init(|| Regex::new(r"(?i)(?:job|task)\s+id:?\s+([\w.-]+)").ok())
        .as_ref()?;
    if let Some(capture) = id_line.captures(stdout) {
        return Some(capture[1].trim_end_matches(':').to_string());
    }

    let uuid = UUID
        .get_or_init(|| {
            Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").ok()
        })
        .as_ref()?;
    uuid.find(stdout).map(|m| m.as_str().to_string())
}

fn parse_queue_status(line: &str) -> ReportedStatus {
    let lower = line.to_lowercase();
    if lower.contains("running") {
        ReportedStatus::Running
    } else if lower.contains("pending") || lower.contains("starting") {
        ReportedStatus::Pending
    } else if lower.contains("succeeded") || lower.contains("completed") {
        ReportedStatus::Succeeded
    } else if lower.contains("failed") {
        ReportedStatus::Failed
    } else if lower.contains("cancelled") || lower.contains("canceled") {
        ReportedStatus::Cancelled
    } else {
        ReportedStatus::Error
    }
}

fn accelerator_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z][\w-]*):(\d+)").ok())
        .as_ref()
}

fn duration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+[hms](?:\s*\d+[ms])?").ok())
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_line_wins_over_uuid() {
        let stdout = "Submitting...\nJob ID: 42\nuuid 123e4567-e89b-12d3-a456-426614174000";
        assert_eq!(extract_job_id(stdout), Some("42".to_string()));
    }

    #[test]
    fn uuid_fallback_applies() {
        let stdout = "Launched 123e4567-e89b-12d3-a456-426614174000 ok";
        assert_eq!(
            extract_job_id(stdout),
            Some("123e4567-e89b-12d3-a456-426614174000".to_string())
        );
    }

    #[test]
    fn missing_id_returns_none() {
        assert_eq!(extract_job_id("nothing to see"), None);
    }

    #[test]
    fn queue_lines_map_to_statuses() {
        assert_eq!(parse_queue_status("1  job  RUNNING  A10:1"), ReportedStatus::Running);
        assert_eq!(parse_queue_status("1  job  PENDING"), ReportedStatus::Pending);
        assert_eq!(parse_queue_status("1  job  SUCCEEDED  5m 12s"), ReportedStatus::Succeeded);
        assert_eq!(parse_queue_status("1  job  FAILED"), ReportedStatus::Failed);
        assert_eq!(parse_queue_status("1  job  CANCELLED"), ReportedStatus::Cancelled);
        assert_eq!(parse_queue_status("1  job  ???"), ReportedStatus::Error);
    }

    #[test]
    fn accelerators_parse_from_queue_lines() {
        let line = "1  simstudio-run-1  RUNNING  A100:2  3m 4s";
        let capture = accelerator_regex().unwrap().captures(line).unwrap();
        assert_eq!(&capture[1], "A100");
        assert_eq!(&capture[2], "2");
    }
}
