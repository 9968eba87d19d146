// file: src/module/reading.rs
// description: reading modules streaming external sources into storage

use crate::error::{PipelineError, Result};
use crate::module::contract::{ModuleContext, ModuleKind, PipelineModule};
use crate::pipeline::chunks::ChunkPlan;
use crate::storage::{AttrValue, DType};
use ndarray::{Array, IxDyn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Optional attribute sidecar accompanying a raw cube file.
#[derive(Debug, Default, Deserialize)]
pub struct CubeSidecar {
    #[serde(default, rename = "static")]
    pub static_attrs: BTreeMap<String, AttrValue>,
    /// Names of static keys to store as protected.
    #[serde(default)]
    pub protected: Vec<String>,
    #[serde(default)]
    pub non_static: BTreeMap<String, Vec<f64>>,
}

impl CubeSidecar {
    fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(|e| {
            PipelineError::Serialization(format!(
                "Invalid attribute sidecar '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Streams a headerless little-endian cube file into a dataset, one chunk of
/// frames at a time, and populates the mandatory static attributes every
/// downstream module relies on.
pub struct RawCubeReader {
    name: String,
    file: PathBuf,
    out_tag: String,
    frame_shape: Vec<usize>,
    dtype: DType,
    sidecar: Option<PathBuf>,
}

impl RawCubeReader {
    pub fn new(
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        out_tag: impl Into<String>,
        frame_shape: Vec<usize>,
        dtype: DType,
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            out_tag: out_tag.into(),
            frame_shape,
            dtype,
            sidecar: None,
        }
    }

    pub fn with_sidecar(mut self, sidecar: impl Into<PathBuf>) -> Self {
        self.sidecar = Some(sidecar.into());
        self
    }
}

impl PipelineModule for RawCubeReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Reading
    }

    fn output_tags(&self) -> Vec<String> {
        vec![self.out_tag.clone()]
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        let frame_elems: usize = self.frame_shape.iter().product();
        let frame_bytes = frame_elems * self.dtype.size_bytes();
        if frame_bytes == 0 {
            return Err(PipelineError::module(&self.name, "empty frame shape"));
        }

        let file_size = std::fs::metadata(&self.file)?.len() as usize;
        if file_size % frame_bytes != 0 {
            return Err(PipelineError::module(
                &self.name,
                format!(
                    "File size {} is not a multiple of the {}-byte frame ({:?}, {})",
                    file_size,
                    frame_bytes,
                    self.frame_shape,
                    self.dtype.name()
                ),
            ));
        }
        let frames = file_size / frame_bytes;

        info!(
            "Reading {} frame(s) of shape {:?} from {}",
            frames,
            self.frame_shape,
            self.file.display()
        );

        let output = ctx.output(&self.out_tag);
        output.reset()?;

        let plan = ChunkPlan::for_frames(
            frames,
            ctx.config().processing.chunk_size,
            ctx.config().processing.memory_budget_mb,
            frame_bytes,
        );

        let mut reader = File::open(&self.file)?;
        for range in plan.iter() {
            let mut bytes = vec![0u8; range.len() * frame_bytes];
            reader.read_exact(&mut bytes)?;

            let mut shape = vec![range.len()];
            shape.extend_from_slice(&self.frame_shape);
            let chunk = self.dtype.decode(&bytes, &shape)?;
            output.append(chunk.view())?;
        }

        output.set_static("NFRAMES", AttrValue::Int(frames as i64))?;
        // NAXIS1 is the fastest-varying axis, FITS-style
        for (i, dim) in self.frame_shape.iter().rev().enumerate() {
            output.set_static(&format!("NAXIS{}", i + 1), AttrValue::Int(*dim as i64))?;
        }

        if let Some(sidecar_path) = &self.sidecar {
            let sidecar = CubeSidecar::load(sidecar_path)?;
            debug!(
                "Applying {} static and {} non-static attribute(s) from sidecar",
                sidecar.static_attrs.len(),
                sidecar.non_static.len()
            );

            for (key, value) in sidecar.static_attrs {
                if sidecar.protected.iter().any(|k| k == &key) {
                    output.set_static_protected(&key, value)?;
                } else {
                    output.set_static(&key, value)?;
                }
            }

            for (key, values) in sidecar.non_static {
                output.set_non_static(&key, values)?;
            }
        }

        Ok(())
    }
}

/// Deterministic generated stack used by demos and tests: frame f holds the
/// value f plus a small per-pixel gradient.
pub struct SyntheticStackReader {
    name: String,
    out_tag: String,
    frames: usize,
    height: usize,
    width: usize,
}

impl SyntheticStackReader {
    pub fn new(
        name: impl Into<String>,
        out_tag: impl Into<String>,
        frames: usize,
        height: usize,
        width: usize,
    ) -> Self {
        Self {
            name: name.into(),
            out_tag: out_tag.into(),
            frames,
            height,
            width,
        }
    }
}

impl PipelineModule for SyntheticStackReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Reading
    }

    fn output_tags(&self) -> Vec<String> {
        vec![self.out_tag.clone()]
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        let output = ctx.output(&self.out_tag);
        output.reset()?;

        let frame_bytes = self.height * self.width * std::mem::size_of::<f64>();
        let plan = ChunkPlan::for_frames(
            self.frames,
            ctx.config().processing.chunk_size,
            ctx.config().processing.memory_budget_mb,
            frame_bytes,
        );
        let (height, width) = (self.height, self.width);

        for range in plan.iter() {
            let start = range.start;
            let chunk = Array::from_shape_fn(
                IxDyn(&[range.len(), height, width]),
                |idx| (start + idx[0]) as f64 + 0.001 * (idx[1] * width + idx[2]) as f64,
            );
            output.append(chunk.view())?;
        }

        output.set_static("NFRAMES", AttrValue::Int(self.frames as i64))?;
        output.set_static("NAXIS1", AttrValue::Int(self.width as i64))?;
        output.set_static("NAXIS2", AttrValue::Int(self.height as i64))?;
        output.set_static_protected("INSTRUMENT", AttrValue::from("SYNTHETIC"))?;
        output.set_static("PIXSCALE", AttrValue::Float(0.01))?;
        output.set_non_static("TIME", (0..self.frames).map(|i| i as f64).collect())?;

        Ok(())
    }
}
