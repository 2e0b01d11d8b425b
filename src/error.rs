use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    System(#[from] SystemError),
}

impl StudioError {
    /// Short stable code used in API error envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spec(SpecError::Validation { .. }) => "VALIDATION_ERROR",
            Self::Spec(SpecError::Security(_)) => "SECURITY_ERROR",
            Self::Sim(_) => "SIM_ERROR",
            Self::Policy(_) => "POLICY_ERROR",
            Self::Rollout(_) => "ROLLOUT_ERROR",
            Self::Orchestrator(OrchestratorError::Timeout { .. }) => "TIMEOUT_ERROR",
            Self::Orchestrator(OrchestratorError::UnknownRun(_)) => "NOT_FOUND",
            Self::Orchestrator(_) => "ORCHESTRATOR_ERROR",
            Self::Ingest(_) => "INGEST_ERROR",
            Self::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
            Self::Storage(StorageError::Timeout { .. }) => "TIMEOUT_ERROR",
            Self::Storage(_) => "EXTERNAL_SERVICE_ERROR",
            Self::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Orchestrator(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised while validating or sanitizing an environment specification.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Invalid field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    #[error("Payload rejected: {0}")]
    Security(String),
}

impl SpecError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the simulator kernel. The step function itself never fails;
/// these cover episode construction and compiled-environment lookups.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown agent id: '{0}'")]
    UnknownAgent(String),

    #[error("Unknown object id: '{0}'")]
    UnknownObject(String),

    #[error("Invalid simulator state: {0}")]
    InvalidState(String),
}

/// Errors occurring within policy logic or model loading.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid input to policy: {0}")]
    InvalidInput(String),

    #[error("Missing model resource: {0}")]
    MissingModel(String),

    #[error("Failed to decode model artifact: {0}")]
    ModelDecode(String),

    #[error("Unsupported algorithm family: '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Errors from the rollout engine. Individual rollout failures are recorded
/// in the batch result; these surface driver-level misuse.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Invalid rollout request: {0}")]
    InvalidRequest(String),

    #[error("Rollout worker panicked: {0}")]
    WorkerPanic(String),

    #[error("Batch wall-clock deadline exceeded after {0:?}")]
    Deadline(std::time::Duration),
}

/// Errors from the training-job orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Cancel failed for job '{job_id}': {reason}")]
    Cancel { job_id: String, reason: String },

    #[error("Compute backend is not configured: {0}")]
    BackendUnavailable(String),

    #[error("Unknown run id: '{0}'")]
    UnknownRun(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("{op} timed out after {deadline:?}")]
    Timeout {
        op: &'static str,
        deadline: std::time::Duration,
    },

    #[error("Failed to render workload manifest: {0}")]
    Manifest(String),
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BackendUnavailable(_))
    }
}

/// Errors from the metrics and log ingestion path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingestion queue is closed")]
    QueueClosed,

    #[error("Rejected metric point: {0}")]
    RejectedMetric(String),

    #[error("Rejected log batch: {0}")]
    RejectedLogs(String),
}

/// Errors from the storage client and blob store capabilities.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{service} error: {message}")]
    Service {
        service: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("{resource} not found: '{id}'")]
    NotFound { resource: &'static str, id: String },

    #[error("{service} call timed out after {deadline:?}")]
    Timeout {
        service: &'static str,
        deadline: std::time::Duration,
    },

    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Object store operation failed: {0}")]
    ObjectStore(String),
}

impl StorageError {
    pub fn service(service: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn client_side(service: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Service { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::ObjectStore(_) => true,
            Self::NotFound { .. } | Self::Io(_) | Self::Json(_) => false,
        }
    }
}

/// Errors related to internal invariants and bugs.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Missing internal field: {0}")]
    MissingField(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("System error: {0}")]
    Generic(String),
}
