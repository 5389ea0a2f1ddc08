//! Job pipeline: stage contracts, the four stages with their fallback policy,
//! the job orchestrator and the worker pool that runs it.

pub mod capabilities;
pub mod orchestrator;
pub mod stages;
pub mod template;
pub mod traits;
pub mod worker_pool;
pub mod workspace;

use serde::{Deserialize, Serialize};

pub use capabilities::Capabilities;
pub use orchestrator::{JobOrchestrator, JobOutcome, JobRunner};
pub use stages::{AssemblyStage, NarrationStage, ScriptStage, VisualsStage, desired_visual_count};
pub use worker_pool::{JobSender, WorkerPool};
pub use workspace::JobWorkspace;

/// Pipeline stage, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Script,
    Visuals,
    Narration,
    Assembly,
}
