// file: src/module/writing.rs
// description: writing modules streaming datasets to external sinks

use crate::error::{PipelineError, Result};
use crate::module::contract::{ModuleContext, ModuleKind, PipelineModule, TagRequirement};
use crate::storage::AttributeSet;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
struct ExportSidecar<'a> {
    tag: &'a str,
    shape: &'a [usize],
    dtype: &'a str,
    attributes: &'a AttributeSet,
}

/// Streams a dataset to a headerless little-endian cube file, with the
/// shape, dtype, and all attributes written to a JSON sidecar next to it.
/// A Writing module consumes storage; it never mutates it.
pub struct RawCubeWriter {
    name: String,
    in_tag: String,
    output: PathBuf,
}

impl RawCubeWriter {
    pub fn new(
        name: impl Into<String>,
        in_tag: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            in_tag: in_tag.into(),
            output: output.into(),
        }
    }

    fn sidecar_path(&self) -> PathBuf {
        let mut path = self.output.clone();
        path.set_extension("attrs.json");
        path
    }
}

impl PipelineModule for RawCubeWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Writing
    }

    fn input_tags(&self) -> Vec<TagRequirement> {
        vec![TagRequirement::required(&self.in_tag)]
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        let input = ctx.input(&self.in_tag)?;
        let shape = input.shape()?;
        let dtype = input.dtype()?;

        info!(
            "Exporting dataset '{}' {:?} to {}",
            self.in_tag,
            shape,
            self.output.display()
        );

        let mut writer = BufWriter::new(File::create(&self.output)?);
        for range in ctx.chunk_plan(&input)?.iter() {
            let chunk = input.read(range)?;
            writer.write_all(&dtype.encode(&chunk.view()))?;
        }
        writer.flush()?;

        let attributes = input.attributes()?;
        let sidecar = ExportSidecar {
            tag: &self.in_tag,
            shape: &shape,
            dtype: dtype.name(),
            attributes: &attributes,
        };
        let sidecar_file = File::create(self.sidecar_path())?;
        serde_json::to_writer_pretty(sidecar_file, &sidecar)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;

        Ok(())
    }
}
