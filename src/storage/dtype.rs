// file: src/storage/dtype.rs
// description: on-disk element encodings for dataset payloads

use crate::error::{PipelineError, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};

/// Element encoding used for a dataset's raw data file. All in-memory
/// processing happens in f64; the dtype only controls the persisted width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    #[default]
    F64,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Encode an array view as little-endian bytes in standard (row-major)
    /// order.
    pub fn encode(self, array: &ArrayViewD<'_, f64>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(array.len() * self.size_bytes());
        match self {
            DType::F32 => {
                for value in array.iter() {
                    bytes.extend_from_slice(&(*value as f32).to_le_bytes());
                }
            }
            DType::F64 => {
                for value in array.iter() {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        bytes
    }

    /// Decode little-endian bytes into an array of the given shape.
    pub fn decode(self, bytes: &[u8], shape: &[usize]) -> Result<ArrayD<f64>> {
        let expected = shape.iter().product::<usize>() * self.size_bytes();
        if bytes.len() != expected {
            return Err(PipelineError::Storage(format!(
                "Expected {} bytes for shape {:?} ({}) but got {}",
                expected,
                shape,
                self.name(),
                bytes.len()
            )));
        }

        let values: Vec<f64> = match self {
            DType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            DType::F64 => bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        };

        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| PipelineError::Storage(format!("Shape mismatch while decoding: {}", e)))
    }
}
