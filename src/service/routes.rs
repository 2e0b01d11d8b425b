use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::header::ORIGIN,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    analysis,
    error::{RolloutError, SpecError},
    ingest::{LogBatch, MetricPoint},
    orchestrator::{JobId, LogChunk, RunConfig, RunId, RunStatus, StatusReport},
    policy::{ModelArtifact, PolicyKind},
    rollout::{
        self, BatchOptions, BenchmarkReport, Rollout, StepRecord, driver::RolloutOptions,
    },
    service::{AppContext, StudioConfig, respond::ApiError, stream},
    spec::EnvSpec,
};

/// Hard bounds on a rollout request's step budget.
pub const MIN_MAX_STEPS: u32 = 1;
pub const MAX_MAX_STEPS: u32 = 10_000;

fn default_max_steps() -> u32 {
    100
}

// ================================================================================================
// Requests
// ================================================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRequest {
    pub env_spec: EnvSpec,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub model_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub run_id: RunId,
    pub config: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusRequest {
    pub status: RunStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    pub max_lines: usize,
}

fn default_log_lines() -> usize {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRolloutRequest {
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub env_spec: Option<EnvSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBatchRequest {
    pub rollouts: Vec<Rollout>,
    #[serde(default)]
    pub env_spec: Option<EnvSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRequest {
    pub env_spec: EnvSpec,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_benchmark_rollouts")]
    pub rollouts: usize,
}

fn default_benchmark_rollouts() -> usize {
    100
}

// ================================================================================================
// Responses
// ================================================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Ack {
    accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchResponse {
    job_id: JobId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    reward: analysis::RewardAnalysis,
    trajectory: analysis::TrajectoryAnalysis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchAnalysisResponse {
    reward: analysis::BatchRewardAnalysis,
    trajectory: analysis::BatchTrajectoryAnalysis,
    termination: analysis::TerminationAnalysis,
}

// ================================================================================================
// Router
// ================================================================================================

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/rollout", post(run_rollout_route))
        .route("/api/rollout/stream", get(stream::stream_rollout))
        .route("/api/runs", post(launch_run))
        .route("/api/runs/{job_id}/status", get(run_status))
        .route("/api/runs/{job_id}/logs", get(run_logs))
        .route("/api/runs/{job_id}/cancel", post(cancel_run))
        .route("/api/runs/{run_id}/worker-status", post(worker_status))
        .route("/api/metrics", post(ingest_metric))
        .route("/api/logs", post(ingest_logs))
        .route("/api/analysis/rollout", post(analyze_rollout_route))
        .route("/api/analysis/batch", post(analyze_batch_route))
        .route("/api/benchmark", post(benchmark_route))
        .layer(middleware::from_fn_with_state(ctx.clone(), enforce_origin))
        .with_state(ctx)
}

/// Rejects requests from origins outside the configured allow-list.
async fn enforce_origin(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !StudioConfig::origin_allowed(&ctx.allowed_origins, origin) {
        let err = ApiError(
            SpecError::Security(format!("origin '{}' is not allowed", origin.unwrap_or("?")))
                .into(),
        );
        return err.into_response();
    }
    next.run(request).await
}

// ================================================================================================
// Handlers
// ================================================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Runs one simulated rollout and returns the full trajectory.
async fn run_rollout_route(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<RolloutRequest>,
) -> Result<Json<Rollout>, ApiError> {
    let rollout = execute_rollout(&ctx, request).await?;
    Ok(Json(rollout.as_ref().clone()))
}

pub(crate) async fn execute_rollout(
    ctx: &AppContext,
    request: RolloutRequest,
) -> Result<Arc<Rollout>, ApiError> {
    validate_max_steps(request.max_steps)?;
    let env = ctx.compiled_env(&request.env_spec)?;

    let key = crate::cache::StudioCaches::rollout_key(
        env.hash(),
        request.policy,
        request.max_steps,
        request.seed,
    );
    if let Some(cached) = ctx.caches.get_rollout(&key) {
        return Ok(cached);
    }

    let model = resolve_model(ctx, &request).await?;
    let factory = ctx.policy_factory(request.policy, model);
    let seed = request.seed.unwrap_or_else(|| rand::random());
    let opts = RolloutOptions::default().with_max_steps(request.max_steps);

    let rollout = tokio::task::spawn_blocking(move || {
        let mut policy = factory(seed)?;
        Ok::<_, crate::error::StudioError>(rollout::run_rollout(
            &env,
            policy.as_mut(),
            &opts,
            &CancellationToken::new(),
            None,
        ))
    })
    .await
    .map_err(|e| RolloutError::WorkerPanic(e.to_string()))??;

    let rollout = Arc::new(rollout);
    ctx.caches.set_rollout(key, rollout.clone());
    Ok(rollout)
}

pub(crate) async fn resolve_model(
    ctx: &AppContext,
    request: &RolloutRequest,
) -> Result<Option<Arc<ModelArtifact>>, ApiError> {
    if request.policy != PolicyKind::TrainedModel {
        return Ok(None);
    }
    let artifact = if let Some(url) = &request.model_url {
        ctx.models.load_by_url(url).await?
    } else if let Some(run_id) = &request.run_id {
        ctx.models.load_for_run(run_id).await?
    } else {
        return Err(crate::error::PolicyError::MissingModel(
            "trained_model policy requires runId or modelUrl".to_string(),
        )
        .into());
    };
    Ok(Some(artifact))
}

pub(crate) fn validate_max_steps(max_steps: u32) -> Result<(), ApiError> {
    if !(MIN_MAX_STEPS..=MAX_MAX_STEPS).contains(&max_steps) {
        return Err(SpecError::validation(
            "maxSteps",
            format!("must be within [{MIN_MAX_STEPS}, {MAX_MAX_STEPS}], got {max_steps}"),
        )
        .into());
    }
    Ok(())
}

async fn launch_run(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<LaunchRequest>,
) -> Result<Json<LaunchResponse>, ApiError> {
    let job_id = ctx
        .orchestrator
        .launch(request.run_id, &request.config)
        .await?;
    Ok(Json(LaunchResponse { job_id }))
}

async fn run_status(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
) -> Json<StatusReport> {
    Json(ctx.orchestrator.get_status(&JobId::new(job_id)).await)
}

async fn run_logs(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogChunk>, ApiError> {
    let chunk = ctx
        .orchestrator
        .get_logs(&JobId::new(job_id), query.max_lines)
        .await?;
    Ok(Json(chunk))
}

async fn cancel_run(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    ctx.orchestrator.cancel(&JobId::new(job_id)).await?;
    Ok(Json(Ack { accepted: true }))
}

/// Worker-initiated status update; merges under the run state machine.
async fn worker_status(
    State(ctx): State<Arc<AppContext>>,
    Path(run_id): Path<String>,
    Json(request): Json<WorkerStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let merged = ctx
        .orchestrator
        .apply_status(&RunId::new(run_id), request.status)
        .await?;
    Ok(Json(serde_json::json!({ "status": merged })))
}

async fn ingest_metric(
    State(ctx): State<Arc<AppContext>>,
    Json(point): Json<MetricPoint>,
) -> Result<Json<Ack>, ApiError> {
    ctx.ingest.ingest_metric(point).await?;
    Ok(Json(Ack { accepted: true }))
}

async fn ingest_logs(
    State(ctx): State<Arc<AppContext>>,
    Json(batch): Json<LogBatch>,
) -> Result<Json<Ack>, ApiError> {
    ctx.ingest.ingest_logs(batch).await?;
    Ok(Json(Ack { accepted: true }))
}

async fn analyze_rollout_route(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<AnalyzeRolloutRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload =
        serde_json::to_vec(&request.steps).map_err(crate::error::StorageError::Json)?;
    let key = analysis_cache_key("analyze_rollout", &payload);
    if let Some(cached) = ctx.caches.get_analysis(&key) {
        return Ok(Json(cached));
    }

    let response = AnalysisResponse {
        reward: analysis::analyze_rollout(&request.steps, request.env_spec.as_ref()),
        trajectory: analysis::analyze_trajectory(&request.steps),
    };
    let value = serde_json::to_value(&response).map_err(crate::error::StorageError::Json)?;
    ctx.caches.set_analysis(key, value.clone());
    Ok(Json(value))
}

async fn analyze_batch_route(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<AnalyzeBatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload =
        serde_json::to_vec(&request.rollouts).map_err(crate::error::StorageError::Json)?;
    let key = analysis_cache_key("analyze_batch", &payload);
    if let Some(cached) = ctx.caches.get_analysis(&key) {
        return Ok(Json(cached));
    }

    let response = BatchAnalysisResponse {
        reward: analysis::analyze_rollouts(&request.rollouts, request.env_spec.as_ref()),
        trajectory: analysis::analyze_trajectories(&request.rollouts),
        termination: analysis::analyze_terminations(&request.rollouts),
    };
    let value = serde_json::to_value(&response).map_err(crate::error::StorageError::Json)?;
    ctx.caches.set_analysis(key, value.clone());
    Ok(Json(value))
}

async fn benchmark_route(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BenchmarkRequest>,
) -> Result<Json<BenchmarkReport>, ApiError> {
    validate_max_steps(request.max_steps)?;
    let env = ctx.compiled_env(&request.env_spec)?;
    let factory = ctx.policy_factory(request.policy, None);
    let opts = BatchOptions::default()
        .with_rollouts(request.rollouts.min(1_000))
        .with_max_steps(request.max_steps);

    let report =
        tokio::task::spawn_blocking(move || rollout::benchmark(&env, factory, &opts))
            .await
            .map_err(|e| RolloutError::WorkerPanic(e.to_string()))??;
    Ok(Json(report))
}

fn analysis_cache_key(function: &str, payload: &[u8]) -> String {
    let digest = blake3::hash(payload);
    crate::cache::StudioCaches::analysis_key(function, &digest.to_hex().as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_steps_bounds_are_enforced() {
        assert!(validate_max_steps(0).is_err());
        assert!(validate_max_steps(1).is_ok());
        assert!(validate_max_steps(10_000).is_ok());
        assert!(validate_max_steps(10_001).is_err());
    }

    #[test]
    fn rollout_request_defaults_apply() {
        let json = serde_json::json!({
            "envSpec": {
                "world": {"worldKind": "grid", "width": 3.0, "height": 3.0},
                "agents": [{"id": "a", "position": [0.0, 0.0]}],
                "objects": [],
                "actionSpace": {"kind": "discrete", "actions": ["up", "down", "left", "right"]},
                "rules": {
                    "rewards": [{"id": "r", "condition": {"type": "reach_goal"}, "reward": 10.0}],
                    "terminations": [{"id": "t", "condition": {"type": "timeout"}}]
                }
            }
        });
        let request: RolloutRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.policy, PolicyKind::Random);
        assert_eq!(request.max_steps, 100);
        assert!(request.seed.is_none());
    }
}
