// file: src/pipeline/recipe.rs
// description: toml-described pipelines built from the built-in module set
// reference: loaded through the config crate like the main configuration

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::module::{
    BackgroundSubtraction, FrameSelection, RawCubeReader, RawCubeWriter, StackAverage,
    SyntheticStackReader,
};
use crate::pipeline::orchestrator::Pipeline;
use crate::storage::DType;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Declarative pipeline description: an ordered list of module entries.
/// Order in the file is execution order.
#[derive(Debug, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSpec {
    RawCubeReader {
        name: String,
        file: PathBuf,
        tag: String,
        frame_shape: Vec<usize>,
        #[serde(default)]
        dtype: DType,
        #[serde(default)]
        sidecar: Option<PathBuf>,
    },
    SyntheticStack {
        name: String,
        tag: String,
        frames: usize,
        height: usize,
        width: usize,
    },
    FrameSelection {
        name: String,
        input: String,
        output: String,
        #[serde(default)]
        indices: Option<Vec<usize>>,
    },
    BackgroundSubtraction {
        name: String,
        input: String,
        output: String,
    },
    StackAverage {
        name: String,
        input: String,
        output: String,
    },
    RawCubeWriter {
        name: String,
        input: String,
        file: PathBuf,
    },
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| PipelineError::Recipe(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| PipelineError::Recipe(e.to_string()))
    }

    pub fn parse(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .map_err(|e| PipelineError::Recipe(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| PipelineError::Recipe(e.to_string()))
    }

    /// Assemble a pipeline from the recipe in file order.
    pub fn build(self, config: Config) -> Result<Pipeline> {
        if self.modules.is_empty() {
            return Err(PipelineError::Recipe(
                "Recipe declares no modules".to_string(),
            ));
        }

        info!("Building pipeline from recipe with {} module(s)", self.modules.len());

        let frame_selection = config.processing.frame_selection.clone();
        let mut pipeline = Pipeline::new(config);

        for spec in self.modules {
            let module: Box<dyn crate::module::PipelineModule> = match spec {
                ModuleSpec::RawCubeReader {
                    name,
                    file,
                    tag,
                    frame_shape,
                    dtype,
                    sidecar,
                } => {
                    let mut reader = RawCubeReader::new(name, file, tag, frame_shape, dtype);
                    if let Some(sidecar) = sidecar {
                        reader = reader.with_sidecar(sidecar);
                    }
                    Box::new(reader)
                }
                ModuleSpec::SyntheticStack {
                    name,
                    tag,
                    frames,
                    height,
                    width,
                } => Box::new(SyntheticStackReader::new(name, tag, frames, height, width)),
                ModuleSpec::FrameSelection {
                    name,
                    input,
                    output,
                    indices,
                } => {
                    let indices = indices
                        .or_else(|| frame_selection.clone())
                        .ok_or_else(|| {
                            PipelineError::Recipe(format!(
                                "Module '{}' has no frame indices and the configuration \
                                 defines no frame_selection",
                                name
                            ))
                        })?;
                    Box::new(FrameSelection::new(name, input, output, indices))
                }
                ModuleSpec::BackgroundSubtraction { name, input, output } => {
                    Box::new(BackgroundSubtraction::new(name, input, output))
                }
                ModuleSpec::StackAverage { name, input, output } => {
                    Box::new(StackAverage::new(name, input, output))
                }
                ModuleSpec::RawCubeWriter { name, input, file } => {
                    Box::new(RawCubeWriter::new(name, input, file))
                }
            };

            pipeline.add_module(module)?;
        }

        Ok(pipeline)
    }
}
