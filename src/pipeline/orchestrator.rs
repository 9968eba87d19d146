// file: src/pipeline/orchestrator.rs
// description: ordered module registry, validation, and execution engine
// reference: insertion order is the execution order; no dependency inference

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::module::contract::{ModuleContext, ModuleKind, PipelineModule, TagRequirement};
use crate::pipeline::progress::{ProgressTracker, RunStats};
use crate::storage::{self, AttrValue, DataStore, SharedStore, shared};
use ndarray::ArrayD;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Running,
    Completed,
    Failed,
}

struct ModuleRecord {
    name: String,
    kind: ModuleKind,
    inputs: Vec<TagRequirement>,
    outputs: Vec<String>,
    propagate: bool,
    module: Box<dyn PipelineModule>,
}

/// Owns the module registry, the shared configuration, and the central data
/// storage. Modules execute strictly in registration order: the module list
/// is an explicit recipe, not an inferred dependency graph.
pub struct Pipeline {
    config: Arc<Config>,
    store: SharedStore,
    modules: Vec<ModuleRecord>,
    state: PipelineState,
}

impl Pipeline {
    /// Create a pipeline over the configured workspace. The storage itself
    /// is opened lazily on first access.
    pub fn new(config: Config) -> Self {
        let store = shared(DataStore::new(&config.workspace.path));

        Self {
            config: Arc::new(config),
            store,
            modules: Vec::new(),
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|r| r.name.clone()).collect()
    }

    /// Register a module at the end of the execution order.
    pub fn add_module(&mut self, module: Box<dyn PipelineModule>) -> Result<()> {
        let name = module.name().to_string();

        if self.modules.iter().any(|r| r.name == name) {
            return Err(PipelineError::DuplicateName(name));
        }

        let kind = module.kind();
        let inputs = module.input_tags();
        let outputs = module.output_tags();

        match kind {
            ModuleKind::Reading if !inputs.is_empty() => {
                return Err(PipelineError::module(
                    &name,
                    "Reading modules must not declare input tags",
                ));
            }
            ModuleKind::Writing if !outputs.is_empty() => {
                return Err(PipelineError::module(
                    &name,
                    "Writing modules must not declare output tags",
                ));
            }
            _ => {}
        }

        for tag in &outputs {
            storage::validate_tag(tag)?;
        }

        debug!("Registered {} module '{}'", kind.name(), name);

        let propagate = module.propagate_attributes();
        self.modules.push(ModuleRecord {
            name,
            kind,
            inputs,
            outputs,
            propagate,
            module,
        });
        self.state = PipelineState::Idle;

        Ok(())
    }

    /// Remove a registered module by name. Returns false when no module with
    /// that name exists.
    pub fn remove_module(&mut self, name: &str) -> bool {
        let before = self.modules.len();
        self.modules.retain(|r| r.name != name);

        let removed = self.modules.len() != before;
        if removed {
            self.state = PipelineState::Idle;
        }
        removed
    }

    /// Check that every required input tag is produced by an earlier module
    /// or already present in storage, before anything executes.
    pub fn validate(&mut self) -> Result<()> {
        self.state = PipelineState::Validating;

        let mut tags: HashSet<String> = storage::lock(&self.store)?
            .tags()?
            .into_iter()
            .collect();

        for record in &self.modules {
            for requirement in &record.inputs {
                if !requirement.optional && !tags.contains(&requirement.tag) {
                    self.state = PipelineState::Failed;
                    return Err(PipelineError::MissingInput {
                        module: record.name.clone(),
                        tag: requirement.tag.clone(),
                    });
                }
            }

            tags.extend(record.outputs.iter().cloned());
        }

        self.state = PipelineState::Idle;
        Ok(())
    }

    /// Validate the whole pipeline, then run every module in registration
    /// order. Stops at the first failure, leaving earlier outputs (and the
    /// failing module's partial output) in storage.
    pub fn run_all(&mut self) -> Result<RunStats> {
        info!("Validating pipeline with {} module(s)", self.modules.len());
        self.validate()?;

        let indices: Vec<usize> = (0..self.modules.len()).collect();
        self.execute(&indices)
    }

    /// Validate and run a single module by name against the current storage
    /// contents.
    pub fn run_module(&mut self, name: &str) -> Result<RunStats> {
        let index = self
            .modules
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| PipelineError::module(name, "not registered in this pipeline"))?;

        self.state = PipelineState::Validating;
        {
            let mut store = storage::lock(&self.store)?;
            let record = &self.modules[index];
            for requirement in &record.inputs {
                if !requirement.optional && !store.has_dataset(&requirement.tag)? {
                    self.state = PipelineState::Failed;
                    return Err(PipelineError::MissingInput {
                        module: record.name.clone(),
                        tag: requirement.tag.clone(),
                    });
                }
            }
        }

        self.execute(&[index])
    }

    fn execute(&mut self, indices: &[usize]) -> Result<RunStats> {
        self.state = PipelineState::Running;
        let progress = ProgressTracker::new(indices.len());

        for &index in indices {
            let record = &mut self.modules[index];
            info!("Running {} module '{}'", record.kind.name(), record.name);
            progress.module_started(&record.name);

            let started = Instant::now();
            let ctx = ModuleContext::new(self.store.clone(), self.config.clone());

            let outcome = record
                .module
                .run(&ctx)
                .and_then(|_| Self::bookkeeping(&self.store, record));

            match outcome {
                Ok(()) => {
                    info!(
                        "Module '{}' finished in {:.2}s",
                        record.name,
                        started.elapsed().as_secs_f64()
                    );
                    progress.module_finished();
                }
                Err(e) => {
                    error!("Module '{}' failed: {}", record.name, e);
                    progress.module_failed(&record.name);
                    progress.abandon();
                    self.state = PipelineState::Failed;
                    return Err(e);
                }
            }
        }

        self.state = PipelineState::Completed;
        progress.finish();

        let datasets = storage::lock(&self.store)?.tags()?.len();
        let stats = progress.get_stats(datasets);
        self.log_final_stats(&stats);

        Ok(stats)
    }

    /// Post-run attribute bookkeeping: apply the default copy propagation to
    /// frame-count-preserving Processing outputs, copying only the keys the
    /// module did not set itself, then verify attribute/frame alignment on
    /// every output.
    fn bookkeeping(store: &SharedStore, record: &ModuleRecord) -> Result<()> {
        let mut store = storage::lock(store)?;

        if record.kind == ModuleKind::Processing && record.propagate {
            if let Some(source) = record.inputs.iter().find(|r| !r.optional) {
                let src_frames = store.frame_count(&source.tag)?;

                for out in &record.outputs {
                    if *out == source.tag || !store.has_dataset(out)? {
                        continue;
                    }
                    if store.frame_count(out)? == src_frames {
                        debug!(
                            "Propagating attributes from '{}' to '{}'",
                            source.tag, out
                        );
                        store.merge_missing_attributes(&source.tag, out)?;
                    }
                }
            }
        }

        for out in &record.outputs {
            if store.has_dataset(out)? {
                store.verify_alignment(out)?;
            }
        }

        Ok(())
    }

    fn log_final_stats(&self, stats: &RunStats) {
        info!("=== Pipeline Execution Summary ===");
        info!("Duration: {} seconds", stats.duration_secs);
        info!("Modules run: {}", stats.modules_run);
        info!("Modules failed: {}", stats.modules_failed);
        info!("Datasets in storage: {}", stats.datasets_in_storage);
        info!("Success rate: {:.2}%", stats.success_rate());
        info!("==================================");
    }

    /// Convenience access to a full dataset; delegates to the opt-in full
    /// read path.
    pub fn get_data(&self, tag: &str) -> Result<ArrayD<f64>> {
        storage::lock(&self.store)?.read_all(tag)
    }

    pub fn get_shape(&self, tag: &str) -> Result<Vec<usize>> {
        storage::lock(&self.store)?.shape(tag)
    }

    pub fn get_static_attribute(&self, tag: &str, key: &str) -> Result<AttrValue> {
        storage::lock(&self.store)?.get_static(tag, key)
    }

    pub fn get_non_static_attribute(&self, tag: &str, key: &str) -> Result<Vec<f64>> {
        storage::lock(&self.store)?.get_non_static(tag, key)
    }

    pub fn dataset_tags(&self) -> Result<Vec<String>> {
        storage::lock(&self.store)?.tags()
    }

    /// Flush and release the storage workspace.
    pub fn close(&mut self) -> Result<()> {
        storage::lock(&self.store)?.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::processing::FrameSelection;
    use crate::module::reading::SyntheticStackReader;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn test_pipeline(dir: &TempDir) -> Pipeline {
        let mut config = Config::default_config();
        config.workspace.path = dir.path().join("workspace");
        config.processing.chunk_size = 7;
        Pipeline::new(config)
    }

    /// Processing module that fills its output with a constant, used to
    /// check explicit ordering and last-writer-wins behavior.
    struct ConstantFill {
        name: String,
        in_tag: String,
        out_tag: String,
        value: f64,
    }

    impl PipelineModule for ConstantFill {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ModuleKind {
            ModuleKind::Processing
        }

        fn input_tags(&self) -> Vec<TagRequirement> {
            vec![TagRequirement::required(&self.in_tag)]
        }

        fn output_tags(&self) -> Vec<String> {
            vec![self.out_tag.clone()]
        }

        fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
            let input = ctx.input(&self.in_tag)?;
            let output = ctx.output(&self.out_tag);
            let value = self.value;

            output.reset()?;
            ctx.apply_to_frames(&input, &output, |chunk| {
                Ok(chunk.mapv(|_| value))
            })?;
            output.set_static("FILL", AttrValue::Float(value))?;
            Ok(())
        }
    }

    /// Module whose run always fails with a domain error.
    struct AlwaysFails {
        name: String,
    }

    impl PipelineModule for AlwaysFails {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ModuleKind {
            ModuleKind::Reading
        }

        fn output_tags(&self) -> Vec<String> {
            vec!["never".to_string()]
        }

        fn run(&mut self, _ctx: &ModuleContext) -> Result<()> {
            Err(PipelineError::module(&self.name, "invalid parameter"))
        }
    }

    /// Processing module that drops frames without restricting attributes,
    /// which the orchestrator must catch defensively.
    struct SloppyFrameDrop {
        name: String,
    }

    impl PipelineModule for SloppyFrameDrop {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ModuleKind {
            ModuleKind::Processing
        }

        fn input_tags(&self) -> Vec<TagRequirement> {
            vec![TagRequirement::required("raw")]
        }

        fn output_tags(&self) -> Vec<String> {
            vec!["raw".to_string()]
        }

        fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
            let input = ctx.input("raw")?;
            let kept = input.read(0..2)?;
            ctx.output("raw").set_all(kept.view())?;

            // Reattach the stale full-length attribute without restricting it
            let output = ctx.output("raw");
            output.set_non_static("TIME", (0..10).map(|i| i as f64).collect())?;
            Ok(())
        }
    }

    fn reader(frames: usize) -> Box<SyntheticStackReader> {
        Box::new(SyntheticStackReader::new("reader", "raw", frames, 8, 8))
    }

    #[test]
    fn test_duplicate_module_name_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(4)).unwrap();
        let result = pipeline.add_module(reader(4));

        assert!(matches!(
            result,
            Err(PipelineError::DuplicateName(ref name)) if name == "reader"
        ));
    }

    #[test]
    fn test_validate_reports_module_and_tag() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline
            .add_module(Box::new(FrameSelection::new(
                "select",
                "calibrated",
                "selected",
                vec![0],
            )))
            .unwrap();

        let result = pipeline.run_all();
        assert!(matches!(
            result,
            Err(PipelineError::MissingInput { ref module, ref tag })
                if module == "select" && tag == "calibrated"
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);

        // Nothing ran: storage holds no datasets
        assert!(pipeline.dataset_tags().unwrap().is_empty());
    }

    #[test]
    fn test_validation_accepts_tags_from_earlier_modules() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(4)).unwrap();
        pipeline
            .add_module(Box::new(FrameSelection::new(
                "select",
                "raw",
                "selected",
                vec![0, 2],
            )))
            .unwrap();

        pipeline.validate().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_reading_then_selection_scenario() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(100)).unwrap();
        pipeline
            .add_module(Box::new(FrameSelection::new(
                "select",
                "raw",
                "selected",
                vec![0, 2, 4],
            )))
            .unwrap();

        let stats = pipeline.run_all().unwrap();
        assert_eq!(stats.modules_run, 2);
        assert_eq!(pipeline.state(), PipelineState::Completed);

        assert_eq!(pipeline.get_shape("raw").unwrap(), vec![100, 8, 8]);
        assert_eq!(pipeline.get_shape("selected").unwrap(), vec![3, 8, 8]);

        let time = pipeline.get_non_static_attribute("selected", "TIME").unwrap();
        assert_eq!(time, vec![0.0, 2.0, 4.0]);

        assert_eq!(
            pipeline.get_static_attribute("selected", "PIXSCALE").unwrap(),
            AttrValue::Float(0.01)
        );

        // Selected data equals the chosen input frames
        let raw = pipeline.get_data("raw").unwrap();
        let selected = pipeline.get_data("selected").unwrap();
        for (out_idx, &src_idx) in [0usize, 2, 4].iter().enumerate() {
            assert_eq!(
                selected.index_axis(ndarray::Axis(0), out_idx),
                raw.index_axis(ndarray::Axis(0), src_idx)
            );
        }
    }

    #[test]
    fn test_last_writer_wins_on_shared_output_tag() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(6)).unwrap();
        pipeline
            .add_module(Box::new(ConstantFill {
                name: "first".to_string(),
                in_tag: "raw".to_string(),
                out_tag: "result".to_string(),
                value: 1.0,
            }))
            .unwrap();
        pipeline
            .add_module(Box::new(ConstantFill {
                name: "second".to_string(),
                in_tag: "raw".to_string(),
                out_tag: "result".to_string(),
                value: 2.0,
            }))
            .unwrap();

        pipeline.run_all().unwrap();

        let result = pipeline.get_data("result").unwrap();
        assert!(result.iter().all(|&v| v == 2.0));
        assert_eq!(
            pipeline.get_static_attribute("result", "FILL").unwrap(),
            AttrValue::Float(2.0)
        );
    }

    #[test]
    fn test_failure_halts_remaining_modules() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(4)).unwrap();
        pipeline
            .add_module(Box::new(AlwaysFails {
                name: "broken".to_string(),
            }))
            .unwrap();
        pipeline
            .add_module(Box::new(FrameSelection::new(
                "select",
                "raw",
                "selected",
                vec![0],
            )))
            .unwrap();

        let result = pipeline.run_all();
        assert!(matches!(
            result,
            Err(PipelineError::Module { ref module, .. }) if module == "broken"
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);

        // Earlier output stays; the halted module never produced its tag
        assert!(pipeline.get_shape("raw").is_ok());
        assert!(pipeline.get_shape("selected").is_err());
    }

    #[test]
    fn test_misaligned_attributes_detected_after_module() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(10)).unwrap();
        pipeline
            .add_module(Box::new(SloppyFrameDrop {
                name: "sloppy".to_string(),
            }))
            .unwrap();

        let result = pipeline.run_all();
        assert!(matches!(
            result,
            Err(PipelineError::AttributeAlignment { ref tag, .. }) if tag == "raw"
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_default_propagation_for_frame_preserving_module() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(5)).unwrap();
        pipeline
            .add_module(Box::new(ConstantFill {
                name: "fill".to_string(),
                in_tag: "raw".to_string(),
                out_tag: "filled".to_string(),
                value: 3.0,
            }))
            .unwrap();

        pipeline.run_all().unwrap();

        // TIME and PIXSCALE arrived via the default copy propagation even
        // though ConstantFill set an attribute of its own
        assert_eq!(
            pipeline
                .get_non_static_attribute("filled", "TIME")
                .unwrap()
                .len(),
            5
        );
        assert_eq!(
            pipeline.get_static_attribute("filled", "PIXSCALE").unwrap(),
            AttrValue::Float(0.01)
        );

        // The module's own attribute was not clobbered by the merge
        assert_eq!(
            pipeline.get_static_attribute("filled", "FILL").unwrap(),
            AttrValue::Float(3.0)
        );
    }

    #[test]
    fn test_run_single_module_by_name() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(4)).unwrap();
        pipeline
            .add_module(Box::new(FrameSelection::new(
                "select",
                "raw",
                "selected",
                vec![1],
            )))
            .unwrap();

        // Selection alone fails validation: "raw" does not exist yet
        assert!(matches!(
            pipeline.run_module("select"),
            Err(PipelineError::MissingInput { .. })
        ));

        pipeline.run_module("reader").unwrap();
        pipeline.run_module("select").unwrap();
        assert_eq!(pipeline.get_shape("selected").unwrap(), vec![1, 8, 8]);

        assert!(pipeline.run_module("unknown").is_err());
    }

    #[test]
    fn test_remove_module() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);

        pipeline.add_module(reader(4)).unwrap();
        assert!(pipeline.remove_module("reader"));
        assert!(!pipeline.remove_module("reader"));
        assert!(pipeline.module_names().is_empty());
    }

    #[test]
    fn test_kind_declaration_mismatch_rejected() {
        struct BadReader;

        impl PipelineModule for BadReader {
            fn name(&self) -> &str {
                "bad"
            }

            fn kind(&self) -> ModuleKind {
                ModuleKind::Reading
            }

            fn input_tags(&self) -> Vec<TagRequirement> {
                vec![TagRequirement::required("raw")]
            }

            fn run(&mut self, _ctx: &ModuleContext) -> Result<()> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);
        assert!(pipeline.add_module(Box::new(BadReader)).is_err());
    }

    #[test]
    fn test_writing_module_reads_without_mutating() {
        use crate::module::writing::RawCubeWriter;

        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir);
        let sink = dir.path().join("export.dat");

        pipeline.add_module(reader(4)).unwrap();
        pipeline
            .add_module(Box::new(RawCubeWriter::new("writer", "raw", &sink)))
            .unwrap();

        pipeline.run_all().unwrap();

        assert!(sink.exists());
        let data = pipeline.get_data("raw").unwrap();
        assert_eq!(data.shape(), &[4, 8, 8]);
    }
}
