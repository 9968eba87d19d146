// file: src/pipeline/chunks.rs
// description: frame-range iteration sized by chunk size and memory budget

use std::ops::Range;

/// Plan for walking a dataset's frame axis in bounded windows. The window
/// size comes from the configured frames-per-slice, clamped so one window
/// never exceeds the memory budget. A step of zero means a single window
/// spanning the whole dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    step: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, step: usize) -> Self {
        let step = if step == 0 || step > total { total } else { step };
        Self { total, step }
    }

    /// Derive the window size from configuration: `chunk_size` frames per
    /// slice, bounded above by how many frames fit in `memory_budget_mb`.
    pub fn for_frames(
        total: usize,
        chunk_size: usize,
        memory_budget_mb: usize,
        frame_bytes: usize,
    ) -> Self {
        let budget_bytes = memory_budget_mb.saturating_mul(1_048_576);
        let budget_frames = if frame_bytes == 0 {
            total
        } else {
            (budget_bytes / frame_bytes).max(1)
        };

        let step = if chunk_size == 0 {
            budget_frames
        } else {
            chunk_size.min(budget_frames)
        };

        Self::new(total, step)
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.step
    }

    pub fn chunk_count(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(self.step)
        }
    }

    pub fn iter(&self) -> Chunks {
        Chunks {
            next: 0,
            total: self.total,
            step: self.step,
        }
    }
}

impl IntoIterator for ChunkPlan {
    type Item = Range<usize>;
    type IntoIter = Chunks;

    fn into_iter(self) -> Chunks {
        self.iter()
    }
}

pub struct Chunks {
    next: usize,
    total: usize,
    step: usize,
}

impl Iterator for Chunks {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.total {
            return None;
        }

        let start = self.next;
        let end = (start + self.step).min(self.total);
        self.next = end;

        Some(start..end)
    }
}
