// file: src/pipeline/mod.rs
// description: pipeline orchestration module exports

pub mod chunks;
pub mod orchestrator;
pub mod progress;
pub mod recipe;

pub use chunks::ChunkPlan;
pub use orchestrator::{Pipeline, PipelineState};
pub use progress::{ProgressTracker, RunStats};
pub use recipe::{ModuleSpec, Recipe};
