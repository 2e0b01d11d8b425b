// === Public Modules (The Canonical Paths) ===
pub mod analysis;
pub mod cache;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod policy;
pub mod rollout;
pub mod service;
pub mod sim;
pub mod spec;
pub mod storage;

// === Private Implementation Details ===
mod macros;

// === Facades (Re-exporting the common entry points) ===
pub use crate::error::{StudioError, StudioResult};
pub use crate::service::{AppContext, StudioConfig, router};
pub use crate::sim::CompiledEnv;
pub use crate::spec::EnvSpec;
