// file: src/module/contract.rs
// description: pipeline module trait, tag declarations, and execution context

use crate::config::Config;
use crate::error::Result;
use crate::module::port::{InputPort, OutputPort};
use crate::pipeline::chunks::ChunkPlan;
use crate::storage::{self, SharedStore};
use ndarray::{ArrayD, ArrayViewD};
use std::sync::Arc;
use tracing::debug;

/// The three module variants the orchestrator dispatches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// External source -> storage. Declares no inputs.
    Reading,
    /// Storage -> external sink. Declares no outputs and must not mutate
    /// storage.
    Writing,
    /// Storage -> storage. The only variant permitted to change the frame
    /// count.
    Processing,
}

impl ModuleKind {
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Reading => "reading",
            ModuleKind::Writing => "writing",
            ModuleKind::Processing => "processing",
        }
    }
}

/// Declared input dependency of a module. Optional inputs are skipped during
/// pipeline validation.
#[derive(Debug, Clone)]
pub struct TagRequirement {
    pub tag: String,
    pub optional: bool,
}

impl TagRequirement {
    pub fn required(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            optional: false,
        }
    }

    pub fn optional(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            optional: true,
        }
    }
}

/// A unit of pipeline work. Modules declare their storage dependencies up
/// front and do all data access through ports handed out by the context.
pub trait PipelineModule {
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleKind;

    fn input_tags(&self) -> Vec<TagRequirement> {
        Vec::new()
    }

    fn output_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the orchestrator may apply default attribute propagation to
    /// this module's outputs after `run`. Modules that manage attributes in
    /// a non-standard way opt out.
    fn propagate_attributes(&self) -> bool {
        true
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()>;
}

/// Everything a running module is allowed to see: port constructors over the
/// shared storage plus the immutable pipeline configuration.
pub struct ModuleContext {
    store: SharedStore,
    config: Arc<Config>,
}

impl ModuleContext {
    pub(crate) fn new(store: SharedStore, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn input(&self, tag: &str) -> Result<InputPort> {
        InputPort::bind(self.store.clone(), tag)
    }

    /// Bind an optional input, returning `None` when the tag is absent.
    pub fn optional_input(&self, tag: &str) -> Result<Option<InputPort>> {
        if storage::lock(&self.store)?.has_dataset(tag)? {
            Ok(Some(InputPort::bind(self.store.clone(), tag)?))
        } else {
            Ok(None)
        }
    }

    pub fn output(&self, tag: &str) -> OutputPort {
        OutputPort::new(
            self.store.clone(),
            tag,
            self.config.processing.default_dtype,
        )
    }

    /// Chunk plan for iterating over a dataset's frames within the
    /// configured memory budget.
    pub fn chunk_plan(&self, input: &InputPort) -> Result<ChunkPlan> {
        let shape = input.shape()?;
        let dtype = input.dtype()?;
        let frame_bytes: usize =
            shape[1..].iter().product::<usize>() * dtype.size_bytes();

        Ok(ChunkPlan::for_frames(
            shape[0],
            self.config.processing.chunk_size,
            self.config.processing.memory_budget_mb,
            frame_bytes,
        ))
    }

    /// The chunk loop: stream the input in bounded slices, apply a
    /// frame-count-preserving transform to each chunk, and write the result
    /// before requesting the next slice. Writes in place when input and
    /// output share a tag, otherwise appends to a freshly reset output.
    /// Returns the number of frames processed.
    pub fn apply_to_frames<F>(
        &self,
        input: &InputPort,
        output: &OutputPort,
        mut transform: F,
    ) -> Result<usize>
    where
        F: FnMut(ArrayViewD<'_, f64>) -> Result<ArrayD<f64>>,
    {
        let plan = self.chunk_plan(input)?;
        let in_place = input.tag() == output.tag();

        if !in_place {
            output.reset()?;
        }

        let mut processed = 0;
        for range in plan.iter() {
            let chunk = input.read(range.clone())?;
            let result = transform(chunk.view())?;
            processed += range.len();

            if in_place {
                output.write(range, result.view())?;
            } else {
                output.append(result.view())?;
            }
        }

        debug!(
            "Processed {} frame(s) from '{}' into '{}'",
            processed,
            input.tag(),
            output.tag()
        );

        Ok(processed)
    }
}
