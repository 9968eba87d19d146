// file: src/storage/store.rs
// description: disk-backed central data storage with chunked dataset access
// reference: workspace directory holding a json manifest plus raw data files

use crate::error::{PipelineError, Result};
use crate::storage::attributes::{AttrValue, AttributeSet};
use crate::storage::dataset::{DatasetMeta, validate_tag};
use crate::storage::dtype::DType;
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "store.json";
const LOCK_FILE: &str = ".lock";
const DATA_DIR: &str = "data";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    datasets: BTreeMap<String, DatasetMeta>,
    #[serde(default)]
    last_opened: Option<String>,
}

/// Central data storage: the sole owner of all datasets and their attributes.
/// Backed by a workspace directory containing a manifest and one raw
/// little-endian data file per dataset, so datasets are always accessed in
/// slices and never need to fit in memory.
///
/// The workspace is opened lazily on first use and held exclusively: a lock
/// file rejects a second writer on the same path.
pub struct DataStore {
    root: PathBuf,
    manifest: Manifest,
    opened: bool,
}

impl DataStore {
    /// Create a handle without touching the filesystem. The workspace is
    /// opened on first access.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: Manifest::default(),
            opened: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    fn data_path(&self, tag: &str) -> PathBuf {
        self.root.join(DATA_DIR).join(format!("{}.dat", tag))
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }

        fs::create_dir_all(self.root.join(DATA_DIR))?;

        // Exclusive ownership: a second open of the same workspace fails
        // instead of risking silent corruption.
        let lock_path = self.lock_path();
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut lock) => {
                write!(lock, "{}", std::process::id())?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PipelineError::Storage(format!(
                    "Workspace '{}' is locked by another pipeline (remove '{}' if stale)",
                    self.root.display(),
                    lock_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let manifest_path = self.manifest_path();
        self.manifest = if manifest_path.exists() {
            let file = File::open(&manifest_path)?;
            serde_json::from_reader(file)
                .map_err(|e| PipelineError::Serialization(format!("Corrupt manifest: {}", e)))?
        } else {
            Manifest::default()
        };

        self.manifest.last_opened = Some(chrono::Utc::now().to_rfc3339());
        self.opened = true;

        info!(
            "Opened storage at {} with {} dataset(s)",
            self.root.display(),
            self.manifest.datasets.len()
        );

        Ok(())
    }

    /// Persist the manifest. Written to a temporary file first so an
    /// interrupted flush never clobbers the previous manifest.
    pub fn flush(&mut self) -> Result<()> {
        if !self.opened {
            return Ok(());
        }

        let tmp = self.manifest_path().with_extension("json.tmp");
        let file = File::create(&tmp)?;
        serde_json::to_writer_pretty(file, &self.manifest)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        fs::rename(&tmp, self.manifest_path())?;

        Ok(())
    }

    /// Flush the manifest and release the workspace lock.
    pub fn close(&mut self) -> Result<()> {
        if !self.opened {
            return Ok(());
        }

        self.flush()?;
        fs::remove_file(self.lock_path())?;
        self.opened = false;

        debug!("Closed storage at {}", self.root.display());
        Ok(())
    }

    fn meta(&self, tag: &str) -> Result<&DatasetMeta> {
        self.manifest
            .datasets
            .get(tag)
            .ok_or_else(|| PipelineError::Storage(format!("Dataset '{}' not found", tag)))
    }

    fn meta_mut(&mut self, tag: &str) -> Result<&mut DatasetMeta> {
        self.manifest
            .datasets
            .get_mut(tag)
            .ok_or_else(|| PipelineError::Storage(format!("Dataset '{}' not found", tag)))
    }

    pub fn has_dataset(&mut self, tag: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.manifest.datasets.contains_key(tag))
    }

    pub fn tags(&mut self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.manifest.datasets.keys().cloned().collect())
    }

    /// Register a new, empty dataset. The per-frame shape and dtype are
    /// frozen from here on; only the leading axis may grow.
    pub fn create_dataset(&mut self, tag: &str, frame_shape: &[usize], dtype: DType) -> Result<()> {
        self.ensure_open()?;
        validate_tag(tag)?;

        if self.manifest.datasets.contains_key(tag) {
            return Err(PipelineError::Storage(format!(
                "Dataset '{}' already exists",
                tag
            )));
        }

        if frame_shape.is_empty() || frame_shape.contains(&0) {
            return Err(PipelineError::Storage(format!(
                "Invalid frame shape {:?} for dataset '{}'",
                frame_shape, tag
            )));
        }

        File::create(self.data_path(tag))?;
        self.manifest
            .datasets
            .insert(tag.to_string(), DatasetMeta::new(tag, frame_shape.to_vec(), dtype));
        self.flush()?;

        debug!("Created dataset '{}' with frame shape {:?}", tag, frame_shape);
        Ok(())
    }

    /// Delete a dataset together with all of its static and non-static
    /// attributes, leaving no orphaned metadata.
    pub fn delete_dataset(&mut self, tag: &str) -> Result<()> {
        self.ensure_open()?;
        self.meta(tag)?;

        self.manifest.datasets.remove(tag);
        let path = self.data_path(tag);
        if path.exists() {
            fs::remove_file(path)?;
        }
        self.flush()?;

        debug!("Deleted dataset '{}'", tag);
        Ok(())
    }

    pub fn shape(&mut self, tag: &str) -> Result<Vec<usize>> {
        self.ensure_open()?;
        Ok(self.meta(tag)?.shape())
    }

    pub fn frame_count(&mut self, tag: &str) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.meta(tag)?.frames)
    }

    pub fn dtype(&mut self, tag: &str) -> Result<DType> {
        self.ensure_open()?;
        Ok(self.meta(tag)?.dtype)
    }

    /// Read a contiguous range of frames.
    pub fn read_slice(&mut self, tag: &str, range: Range<usize>) -> Result<ArrayD<f64>> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        if range.start > range.end || range.end > meta.frames {
            return Err(PipelineError::Storage(format!(
                "Slice {}..{} out of bounds for dataset '{}' with {} frames",
                range.start, range.end, tag, meta.frames
            )));
        }

        let frame_bytes = meta.frame_bytes();
        let dtype = meta.dtype;
        let mut shape = vec![range.len()];
        shape.extend_from_slice(&meta.frame_shape);

        let mut file = File::open(self.data_path(tag))?;
        file.seek(SeekFrom::Start((range.start * frame_bytes) as u64))?;

        let mut bytes = vec![0u8; range.len() * frame_bytes];
        file.read_exact(&mut bytes)?;

        dtype.decode(&bytes, &shape)
    }

    /// Materialize an entire dataset in memory. Opt-in convenience; for
    /// datasets that may exceed the memory budget use `read_slice`.
    pub fn read_all(&mut self, tag: &str) -> Result<ArrayD<f64>> {
        self.ensure_open()?;
        let frames = self.meta(tag)?.frames;

        warn!(
            "Full read of dataset '{}' ({} frames); this may not fit in memory",
            tag, frames
        );

        self.read_slice(tag, 0..frames)
    }

    /// Overwrite a contiguous range of existing frames.
    pub fn write_slice(&mut self, tag: &str, range: Range<usize>, data: ArrayViewD<'_, f64>) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        if range.start > range.end || range.end > meta.frames {
            return Err(PipelineError::Storage(format!(
                "Slice {}..{} out of bounds for dataset '{}' with {} frames",
                range.start, range.end, tag, meta.frames
            )));
        }

        let mut expected = vec![range.len()];
        expected.extend_from_slice(&meta.frame_shape);
        if data.shape() != expected.as_slice() {
            return Err(PipelineError::Storage(format!(
                "Shape mismatch writing to '{}': expected {:?}, got {:?}",
                tag,
                expected,
                data.shape()
            )));
        }

        let offset = (range.start * meta.frame_bytes()) as u64;
        let bytes = meta.dtype.encode(&data);

        let mut file = OpenOptions::new().write(true).open(self.data_path(tag))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;

        Ok(())
    }

    /// Append frames to the growable leading axis.
    pub fn append_frames(&mut self, tag: &str, data: ArrayViewD<'_, f64>) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        if data.ndim() != meta.frame_shape.len() + 1 || data.shape()[1..] != meta.frame_shape[..] {
            return Err(PipelineError::Storage(format!(
                "Shape mismatch appending to '{}': frame shape is {:?}, got chunk shape {:?}",
                tag,
                meta.frame_shape,
                data.shape()
            )));
        }

        let bytes = meta.dtype.encode(&data);
        let added = data.shape()[0];

        let mut file = OpenOptions::new().append(true).open(self.data_path(tag))?;
        file.write_all(&bytes)?;

        self.meta_mut(tag)?.frames += added;
        self.flush()?;

        Ok(())
    }

    pub fn get_static(&mut self, tag: &str, key: &str) -> Result<AttrValue> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        meta.attributes
            .get_static(key)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Storage(format!(
                    "Static attribute '{}' not found on dataset '{}'",
                    key, tag
                ))
            })
    }

    pub fn set_static(
        &mut self,
        tag: &str,
        key: &str,
        value: AttrValue,
        protected: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta_mut(tag)?;
        let tag_owned = meta.tag.clone();
        meta.attributes.set_static(&tag_owned, key, value, protected)?;
        self.flush()
    }

    /// Read a per-frame attribute array. Fails if the stored length no
    /// longer matches the frame count instead of returning misaligned data.
    pub fn get_non_static(&mut self, tag: &str, key: &str) -> Result<Vec<f64>> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        let values = meta.attributes.get_non_static(key).ok_or_else(|| {
            PipelineError::Storage(format!(
                "Non-static attribute '{}' not found on dataset '{}'",
                key, tag
            ))
        })?;

        if values.len() != meta.frames {
            return Err(PipelineError::AttributeAlignment {
                tag: tag.to_string(),
                key: key.to_string(),
                len: values.len(),
                frames: meta.frames,
            });
        }

        Ok(values.clone())
    }

    pub fn set_non_static(&mut self, tag: &str, key: &str, values: Vec<f64>) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta_mut(tag)?;

        if values.len() != meta.frames {
            debug!(
                "Non-static attribute '{}' on '{}' has length {} while dataset holds {} frames",
                key,
                tag,
                values.len(),
                meta.frames
            );
        }

        meta.attributes.set_non_static(key, values);
        self.flush()
    }

    pub fn attributes(&mut self, tag: &str) -> Result<AttributeSet> {
        self.ensure_open()?;
        Ok(self.meta(tag)?.attributes.clone())
    }

    /// Default propagation for frame-count-preserving transforms: duplicate
    /// every attribute of `src_tag` onto `dst_tag`.
    pub fn copy_attributes(&mut self, src_tag: &str, dst_tag: &str) -> Result<()> {
        self.ensure_open()?;
        let source = self.meta(src_tag)?.attributes.clone();

        let dst = self.meta_mut(dst_tag)?;
        let dst_tag_owned = dst.tag.clone();
        dst.attributes.copy_from(&dst_tag_owned, &source)?;
        self.flush()
    }

    /// Copy only the attributes `dst_tag` does not already carry, leaving
    /// anything the producing module set on its output untouched.
    pub fn merge_missing_attributes(&mut self, src_tag: &str, dst_tag: &str) -> Result<()> {
        self.ensure_open()?;
        let source = self.meta(src_tag)?.attributes.clone();

        self.meta_mut(dst_tag)?.attributes.merge_missing(&source);
        self.flush()
    }

    /// Propagation for frame-count-changing transforms: subset every
    /// non-static attribute by the index set that was applied to the data.
    pub fn restrict_attributes(&mut self, tag: &str, indices: &[usize]) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta_mut(tag)?;
        let tag_owned = meta.tag.clone();
        meta.attributes.restrict(&tag_owned, indices)?;
        self.flush()
    }

    /// Defensive check run after every module: every non-static attribute
    /// must match the current frame count.
    pub fn verify_alignment(&mut self, tag: &str) -> Result<()> {
        self.ensure_open()?;
        let meta = self.meta(tag)?;

        for (key, values) in &meta.attributes.non_static {
            if values.len() != meta.frames {
                return Err(PipelineError::AttributeAlignment {
                    tag: tag.to_string(),
                    key: key.clone(),
                    len: values.len(),
                    frames: meta.frames,
                });
            }
        }

        Ok(())
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        if self.opened {
            if let Err(e) = self.close() {
                warn!("Failed to close storage cleanly: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array3};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn cube(frames: usize, offset: f64) -> ArrayD<f64> {
        Array3::from_shape_fn((frames, 4, 4), |(f, y, x)| {
            offset + (f * 16 + y * 4 + x) as f64
        })
        .into_dyn()
    }

    fn open_store(dir: &TempDir) -> DataStore {
        DataStore::new(dir.path().join("workspace"))
    }

    #[test]
    fn test_create_append_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(3, 0.0).view()).unwrap();
        store.append_frames("raw", cube(2, 100.0).view()).unwrap();

        assert_eq!(store.shape("raw").unwrap(), vec![5, 4, 4]);

        let tail = store.read_slice("raw", 3..5).unwrap();
        assert_eq!(tail, cube(2, 100.0));
    }

    #[test]
    fn test_sliced_reads_equal_full_read() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F32).unwrap();
        store.append_frames("raw", cube(10, 0.0).view()).unwrap();

        let full = store.read_all("raw").unwrap();

        for step in [1usize, 3, 4, 10] {
            let mut pieces = Vec::new();
            let mut start = 0;
            while start < 10 {
                let end = (start + step).min(10);
                pieces.push(store.read_slice("raw", start..end).unwrap());
                start = end;
            }
            let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
            let stacked = ndarray::concatenate(ndarray::Axis(0), &views).unwrap();
            assert_eq!(stacked, full, "slice size {}", step);
        }
    }

    #[test]
    fn test_write_slice_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(5, 0.0).view()).unwrap();

        let replacement = Array::zeros(ndarray::IxDyn(&[2, 4, 4]));
        store.write_slice("raw", 1..3, replacement.view()).unwrap();

        let read = store.read_slice("raw", 1..3).unwrap();
        assert_eq!(read, replacement);

        // Neighboring frames untouched
        let first = store.read_slice("raw", 0..1).unwrap();
        assert_eq!(first, cube(1, 0.0));
    }

    #[test]
    fn test_out_of_bounds_slice_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(3, 0.0).view()).unwrap();

        assert!(matches!(
            store.read_slice("raw", 2..5),
            Err(PipelineError::Storage(_))
        ));
        assert!(matches!(
            store.write_slice("raw", 2..5, cube(3, 0.0).view()),
            Err(PipelineError::Storage(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_on_append_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[8, 8], DType::F64).unwrap();
        let result = store.append_frames("raw", cube(2, 0.0).view());
        assert!(matches!(result, Err(PipelineError::Storage(_))));
    }

    #[test]
    fn test_missing_tag_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        assert!(matches!(
            store.read_slice("nope", 0..1),
            Err(PipelineError::Storage(_))
        ));
    }

    #[test]
    fn test_delete_removes_data_and_attributes() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(2, 0.0).view()).unwrap();
        store
            .set_static("raw", "PIXSCALE", AttrValue::Float(0.01), false)
            .unwrap();
        store
            .set_non_static("raw", "TIME", vec![0.0, 1.0])
            .unwrap();

        store.delete_dataset("raw").unwrap();
        assert!(!store.has_dataset("raw").unwrap());

        // Recreating the tag starts from a clean attribute set
        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        assert!(store.attributes("raw").unwrap().is_empty());
    }

    #[test]
    fn test_misaligned_non_static_read_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(3, 0.0).view()).unwrap();
        store
            .set_non_static("raw", "TIME", vec![0.0, 1.0])
            .unwrap();

        assert!(matches!(
            store.get_non_static("raw", "TIME"),
            Err(PipelineError::AttributeAlignment { len: 2, frames: 3, .. })
        ));
        assert!(store.verify_alignment("raw").is_err());
    }

    #[test]
    fn test_copy_and_restrict_attributes() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        store.append_frames("raw", cube(4, 0.0).view()).unwrap();
        store
            .set_static("raw", "PIXSCALE", AttrValue::Float(0.01), false)
            .unwrap();
        store
            .set_non_static("raw", "TIME", vec![0.0, 1.0, 2.0, 3.0])
            .unwrap();

        store.create_dataset("sel", &[4, 4], DType::F64).unwrap();
        store.append_frames("sel", cube(2, 0.0).view()).unwrap();

        store.copy_attributes("raw", "sel").unwrap();
        store.restrict_attributes("sel", &[1, 3]).unwrap();

        assert_eq!(
            store.get_static("sel", "PIXSCALE").unwrap(),
            AttrValue::Float(0.01)
        );
        assert_eq!(store.get_non_static("sel", "TIME").unwrap(), vec![1.0, 3.0]);
        store.verify_alignment("sel").unwrap();
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace");

        {
            let mut store = DataStore::new(&path);
            store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
            store.append_frames("raw", cube(3, 0.0).view()).unwrap();
            store
                .set_static("raw", "INSTRUMENT", AttrValue::from("NACO"), true)
                .unwrap();
            store.close().unwrap();
        }

        let mut store = DataStore::new(&path);
        assert_eq!(store.shape("raw").unwrap(), vec![3, 4, 4]);
        assert_eq!(
            store.get_static("raw", "INSTRUMENT").unwrap(),
            AttrValue::from("NACO")
        );
        assert_eq!(store.read_all("raw").unwrap(), cube(3, 0.0));
    }

    #[test]
    fn test_second_open_rejected_while_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace");

        let mut first = DataStore::new(&path);
        first.create_dataset("raw", &[4, 4], DType::F64).unwrap();

        let mut second = DataStore::new(&path);
        assert!(matches!(
            second.tags(),
            Err(PipelineError::Storage(_))
        ));

        first.close().unwrap();
        assert!(second.tags().is_ok());
    }

    #[test]
    fn test_duplicate_create_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.create_dataset("raw", &[4, 4], DType::F64).unwrap();
        assert!(store.create_dataset("raw", &[4, 4], DType::F64).is_err());
    }
}
