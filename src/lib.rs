// file: src/lib.rs
// description: library entry point and public api exports
// reference: rust library patterns
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/readme.md"))]

pub mod config;
pub mod error;
pub mod module;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use config::{Config, ProcessingConfig, WorkspaceConfig};
pub use error::{PipelineError, Result};
pub use module::{
    BackgroundSubtraction, FrameSelection, InputPort, ModuleContext, ModuleKind, OutputPort,
    PipelineModule, RawCubeReader, RawCubeWriter, StackAverage, SyntheticStackReader,
    TagRequirement,
};
pub use pipeline::{ChunkPlan, Pipeline, PipelineState, ProgressTracker, Recipe, RunStats};
pub use storage::{AttrValue, AttributeSet, DType, DataStore, DatasetMeta, SharedStore, StaticAttr};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let config = Config::default_config();
        let _pipeline = Pipeline::new(config);
    }
}
