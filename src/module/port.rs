// file: src/module/port.rs
// description: typed input/output handles binding modules to storage datasets

use crate::error::{PipelineError, Result};
use crate::storage::{self, AttrValue, AttributeSet, DType, SharedStore};
use ndarray::{ArrayD, ArrayViewD};
use std::ops::Range;

/// Read-only handle onto a dataset. Binding fails fast if the tag does not
/// exist, shifting missing-input failures to setup time.
pub struct InputPort {
    tag: String,
    store: SharedStore,
}

impl InputPort {
    pub(crate) fn bind(store: SharedStore, tag: &str) -> Result<Self> {
        if !storage::lock(&store)?.has_dataset(tag)? {
            return Err(PipelineError::PortBinding {
                tag: tag.to_string(),
            });
        }

        Ok(Self {
            tag: tag.to_string(),
            store,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn shape(&self) -> Result<Vec<usize>> {
        storage::lock(&self.store)?.shape(&self.tag)
    }

    pub fn frame_count(&self) -> Result<usize> {
        storage::lock(&self.store)?.frame_count(&self.tag)
    }

    pub fn dtype(&self) -> Result<DType> {
        storage::lock(&self.store)?.dtype(&self.tag)
    }

    pub fn read(&self, range: Range<usize>) -> Result<ArrayD<f64>> {
        storage::lock(&self.store)?.read_slice(&self.tag, range)
    }

    /// Opt-in full materialization; logged by storage as potentially
    /// memory-unsafe.
    pub fn read_all(&self) -> Result<ArrayD<f64>> {
        storage::lock(&self.store)?.read_all(&self.tag)
    }

    pub fn get_static(&self, key: &str) -> Result<AttrValue> {
        storage::lock(&self.store)?.get_static(&self.tag, key)
    }

    pub fn get_non_static(&self, key: &str) -> Result<Vec<f64>> {
        storage::lock(&self.store)?.get_non_static(&self.tag, key)
    }

    /// Snapshot of every attribute attached to the dataset.
    pub fn attributes(&self) -> Result<AttributeSet> {
        storage::lock(&self.store)?.attributes(&self.tag)
    }
}

/// Write-capable handle onto a dataset. The dataset is created lazily on the
/// first write, inferring the frame shape from the first chunk; afterwards
/// only the leading axis may grow.
pub struct OutputPort {
    tag: String,
    store: SharedStore,
    dtype: DType,
}

impl OutputPort {
    pub(crate) fn new(store: SharedStore, tag: &str, dtype: DType) -> Self {
        Self {
            tag: tag.to_string(),
            store,
            dtype,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn exists(&self) -> Result<bool> {
        storage::lock(&self.store)?.has_dataset(&self.tag)
    }

    pub fn frame_count(&self) -> Result<usize> {
        storage::lock(&self.store)?.frame_count(&self.tag)
    }

    /// Drop any existing dataset under this tag so a rerun starts clean.
    pub fn reset(&self) -> Result<()> {
        let mut store = storage::lock(&self.store)?;
        if store.has_dataset(&self.tag)? {
            store.delete_dataset(&self.tag)?;
        }
        Ok(())
    }

    /// Append a chunk of frames, creating the dataset on first use.
    pub fn append(&self, chunk: ArrayViewD<'_, f64>) -> Result<()> {
        let mut store = storage::lock(&self.store)?;

        if !store.has_dataset(&self.tag)? {
            if chunk.ndim() < 2 {
                return Err(PipelineError::Storage(format!(
                    "Cannot infer frame shape for '{}' from a {}-dimensional chunk",
                    self.tag,
                    chunk.ndim()
                )));
            }
            store.create_dataset(&self.tag, &chunk.shape()[1..], self.dtype)?;
        }

        store.append_frames(&self.tag, chunk)
    }

    /// Overwrite existing frames in place.
    pub fn write(&self, range: Range<usize>, chunk: ArrayViewD<'_, f64>) -> Result<()> {
        storage::lock(&self.store)?.write_slice(&self.tag, range, chunk)
    }

    /// Replace the dataset wholesale with the given array.
    pub fn set_all(&self, data: ArrayViewD<'_, f64>) -> Result<()> {
        self.reset()?;
        self.append(data)
    }

    pub fn set_static(&self, key: &str, value: AttrValue) -> Result<()> {
        storage::lock(&self.store)?.set_static(&self.tag, key, value, false)
    }

    pub fn set_static_protected(&self, key: &str, value: AttrValue) -> Result<()> {
        storage::lock(&self.store)?.set_static(&self.tag, key, value, true)
    }

    pub fn set_non_static(&self, key: &str, values: Vec<f64>) -> Result<()> {
        storage::lock(&self.store)?.set_non_static(&self.tag, key, values)
    }

    /// Duplicate all attributes of the input onto this dataset. The default
    /// propagation for transforms that keep the frame count.
    pub fn copy_attributes_from(&self, input: &InputPort) -> Result<()> {
        storage::lock(&self.store)?.copy_attributes(input.tag(), &self.tag)
    }

    /// Copy attributes from the input, then subset every non-static array by
    /// the index selection that was applied to the data. Required propagation
    /// for frame-count-changing transforms.
    pub fn restrict_attributes_from(&self, input: &InputPort, indices: &[usize]) -> Result<()> {
        let mut store = storage::lock(&self.store)?;
        store.copy_attributes(input.tag(), &self.tag)?;
        store.restrict_attributes(&self.tag, indices)
    }

    /// Copy only the static attributes of the input, dropping the per-frame
    /// arrays. Used by transforms that collapse the frame axis.
    pub fn copy_static_attributes_from(&self, input: &InputPort) -> Result<()> {
        let mut store = storage::lock(&self.store)?;
        let attrs = store.attributes(input.tag())?;

        for (key, attr) in &attrs.static_attrs {
            store.set_static(&self.tag, key, attr.value.clone(), attr.protected)?;
        }

        Ok(())
    }
}
