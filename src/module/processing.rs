// file: src/module/processing.rs
// description: storage-to-storage transform modules built on the chunk loop

use crate::error::{PipelineError, Result};
use crate::module::contract::{ModuleContext, ModuleKind, PipelineModule, TagRequirement};
use crate::storage::AttrValue;
use ndarray::{ArrayD, Axis};
use tracing::info;

/// Keeps a subset of frames selected by index. The only built-in that
/// changes the frame count; it therefore restricts every non-static
/// attribute with the same index set instead of copying verbatim.
pub struct FrameSelection {
    name: String,
    in_tag: String,
    out_tag: String,
    indices: Vec<usize>,
}

impl FrameSelection {
    pub fn new(
        name: impl Into<String>,
        in_tag: impl Into<String>,
        out_tag: impl Into<String>,
        indices: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            in_tag: in_tag.into(),
            out_tag: out_tag.into(),
            indices,
        }
    }
}

impl PipelineModule for FrameSelection {
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

    // Attribute handling is the restriction below, not the default copy.
    fn propagate_attributes(&self) -> bool {
        false
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        if self.indices.is_empty() {
            return Err(PipelineError::module(&self.name, "empty frame selection"));
        }

        let input = ctx.input(&self.in_tag)?;
        let frames = input.frame_count()?;

        if let Some(&bad) = self.indices.iter().find(|&&i| i >= frames) {
            return Err(PipelineError::module(
                &self.name,
                format!("selected frame {} but '{}' holds {} frames", bad, self.in_tag, frames),
            ));
        }

        info!(
            "Selecting {} of {} frame(s) from '{}' into '{}'",
            self.indices.len(),
            frames,
            self.in_tag,
            self.out_tag
        );

        let output = ctx.output(&self.out_tag);
        output.reset()?;

        // A contiguous run may span the whole stack, so runs are still read
        // in chunk-sized windows.
        let step = ctx.chunk_plan(&input)?.frames_per_chunk().max(1);
        let copy_run = |start: usize, end: usize| -> Result<()> {
            let mut lo = start;
            while lo < end {
                let hi = (lo + step).min(end);
                output.append(input.read(lo..hi)?.view())?;
                lo = hi;
            }
            Ok(())
        };

        // Consecutive indices are grouped into runs so selection stays
        // slice-based rather than frame-by-frame.
        let mut run_start = self.indices[0];
        let mut run_end = run_start + 1;
        for &index in &self.indices[1..] {
            if index == run_end {
                run_end += 1;
            } else {
                copy_run(run_start, run_end)?;
                run_start = index;
                run_end = index + 1;
            }
        }
        copy_run(run_start, run_end)?;

        output.restrict_attributes_from(&input, &self.indices)?;
        output.set_static("NFRAMES", AttrValue::Int(self.indices.len() as i64))?;

        Ok(())
    }
}

/// Subtracts each frame's own mean level, a cheap first-order background
/// removal. Frame count is preserved, so attributes are copied verbatim.
pub struct BackgroundSubtraction {
    name: String,
    in_tag: String,
    out_tag: String,
}

impl BackgroundSubtraction {
    pub fn new(
        name: impl Into<String>,
        in_tag: impl Into<String>,
        out_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            in_tag: in_tag.into(),
            out_tag: out_tag.into(),
        }
    }
}

impl PipelineModule for BackgroundSubtraction {
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

        let processed = ctx.apply_to_frames(&input, &output, |chunk| {
            let mut result = chunk.to_owned();
            for mut frame in result.axis_iter_mut(Axis(0)) {
                let mean = frame.mean().unwrap_or(0.0);
                frame.mapv_inplace(|v| v - mean);
            }
            Ok(result)
        })?;

        if input.tag() != output.tag() {
            output.copy_attributes_from(&input)?;
        }

        info!("Background-subtracted {} frame(s)", processed);
        Ok(())
    }
}

/// Collapses the frame axis into a single mean image using chunked
/// accumulation. Non-static attributes are deliberately dropped since they
/// no longer align with a one-frame dataset; static attributes are kept.
pub struct StackAverage {
    name: String,
    in_tag: String,
    out_tag: String,
}

impl StackAverage {
    pub fn new(
        name: impl Into<String>,
        in_tag: impl Into<String>,
        out_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            in_tag: in_tag.into(),
            out_tag: out_tag.into(),
        }
    }
}

impl PipelineModule for StackAverage {
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

    fn propagate_attributes(&self) -> bool {
        false
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        let input = ctx.input(&self.in_tag)?;
        let frames = input.frame_count()?;
        if frames == 0 {
            return Err(PipelineError::module(
                &self.name,
                format!("dataset '{}' holds no frames", self.in_tag),
            ));
        }

        let shape = input.shape()?;
        let mut sum: ArrayD<f64> = ArrayD::zeros(ndarray::IxDyn(&shape[1..]));
        for range in ctx.chunk_plan(&input)?.iter() {
            let chunk = input.read(range)?;
            sum += &chunk.sum_axis(Axis(0));
        }

        let mean = sum / frames as f64;
        let output = ctx.output(&self.out_tag);
        output.set_all(mean.insert_axis(Axis(0)).view())?;

        output.copy_static_attributes_from(&input)?;
        output.set_static("NFRAMES", AttrValue::Int(1))?;

        Ok(())
    }
}
