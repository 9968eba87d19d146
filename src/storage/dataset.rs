// file: src/storage/dataset.rs
// description: per-dataset metadata kept in the storage manifest

use crate::error::{PipelineError, Result};
use crate::storage::attributes::AttributeSet;
use crate::storage::dtype::DType;
use serde::{Deserialize, Serialize};

/// Maximum allowed tag length. Tags double as data file names.
const MAX_TAG_LENGTH: usize = 256;

/// Metadata of one dataset: its shape split into a growable frame count and
/// a frozen per-frame shape, the on-disk element encoding, and all attached
/// attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub tag: String,
    /// Shape of a single frame, i.e. the dataset shape without the leading
    /// axis. Frozen once any data has been written.
    pub frame_shape: Vec<usize>,
    /// Current length of the growable leading axis.
    pub frames: usize,
    pub dtype: DType,
    pub created_at: String,
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl DatasetMeta {
    pub fn new(tag: &str, frame_shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            tag: tag.to_string(),
            frame_shape,
            frames: 0,
            dtype,
            created_at: chrono::Utc::now().to_rfc3339(),
            attributes: AttributeSet::default(),
        }
    }

    /// Full dataset shape, leading frame axis first.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.frame_shape.len() + 1);
        shape.push(self.frames);
        shape.extend_from_slice(&self.frame_shape);
        shape
    }

    pub fn frame_elems(&self) -> usize {
        self.frame_shape.iter().product()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_elems() * self.dtype.size_bytes()
    }
}

/// Reject tags that cannot be used as a data file name. Tags are restricted
/// to alphanumerics, dash, underscore, and dot, and must not start with a
/// dot or contain path components.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(PipelineError::Storage(
            "Dataset tag must not be empty".to_string(),
        ));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(PipelineError::Storage(format!(
            "Dataset tag too long: {} (max: {})",
            tag.len(),
            MAX_TAG_LENGTH
        )));
    }

    if tag == "." || tag == ".." || tag.starts_with('.') {
        return Err(PipelineError::Storage(format!(
            "Invalid dataset tag '{}'",
            tag
        )));
    }

    for c in tag.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(PipelineError::Storage(format!(
                "Invalid character '{}' in dataset tag '{}'",
                c, tag
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_includes_frame_axis() {
        let mut meta = DatasetMeta::new("raw", vec![64, 64], DType::F64);
        assert_eq!(meta.shape(), vec![0, 64, 64]);

        meta.frames = 100;
        assert_eq!(meta.shape(), vec![100, 64, 64]);
        assert_eq!(meta.frame_elems(), 4096);
        assert_eq!(meta.frame_bytes(), 4096 * 8);
    }

    #[test]
    fn test_valid_tags() {
        assert!(validate_tag("raw").is_ok());
        assert!(validate_tag("dark_subtracted").is_ok());
        assert!(validate_tag("science.v2").is_ok());
    }

    #[test]
    fn test_invalid_tags() {
        assert!(validate_tag("").is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("..").is_err());
        assert!(validate_tag("a/b").is_err());
        assert!(validate_tag("raw frames").is_err());
        assert!(validate_tag(&"x".repeat(300)).is_err());
    }
}
