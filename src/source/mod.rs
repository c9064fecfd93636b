//! Tensor sources the converter reads weights from.
//!
//! This module provides:
//! - `TensorSource`: key enumeration and typed tensor retrieval
//! - `SafeTensorsSource`: memory-mapped `.safetensors` file or shard directory
//! - `InMemorySource`: map-backed source, handy for tests and tooling
//! - `keys`: typed key builder and alias resolution

pub mod keys;
mod memory;
mod safetensors_source;

pub use self::keys::{layer_key, TensorKey};
pub use self::memory::InMemorySource;
pub use self::safetensors_source::SafeTensorsSource;

use std::collections::BTreeSet;

use safetensors::Dtype;

use crate::BitFlatError;

/// Provider of named, typed weight arrays.
pub trait TensorSource {
    /// All tensor names available from this source
    fn keys(&self) -> BTreeSet<String>;

    /// Load a tensor into memory. Absent keys yield `MissingTensor`.
    fn get(&self, key: &str) -> crate::Result<SourceTensor>;

    /// Whether a tensor with this name exists
    fn contains(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    /// Shape of a tensor without materializing its data
    fn shape(&self, key: &str) -> crate::Result<Vec<usize>> {
        self.get(key).map(|t| t.shape().to_vec())
    }
}

/// A weight tensor copied out of its source: raw little-endian bytes plus
/// the dtype and shape needed to interpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTensor {
    name: String,
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl SourceTensor {
    /// Create a tensor, checking the buffer length against shape and dtype
    pub fn new(
        name: impl Into<String>,
        dtype: Dtype,
        shape: Vec<usize>,
        data: Vec<u8>,
    ) -> crate::Result<Self> {
        let name = name.into();
        let numel: usize = shape.iter().product();
        let expected = numel * dtype.size();

        if data.len() != expected {
            return Err(BitFlatError::UnsupportedShape {
                key: name,
                reason: format!(
                    "buffer holds {} bytes but shape {:?} of {:?} needs {}",
                    data.len(),
                    shape,
                    dtype,
                    expected
                ),
            });
        }

        Ok(Self {
            name,
            dtype,
            shape,
            data,
        })
    }

    /// Build an f32 tensor from values
    pub fn from_f32(
        name: impl Into<String>,
        shape: Vec<usize>,
        values: &[f32],
    ) -> crate::Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, Dtype::F32, shape, data)
    }

    /// Build an i8 tensor from values
    pub fn from_i8(
        name: impl Into<String>,
        shape: Vec<usize>,
        values: &[i8],
    ) -> crate::Result<Self> {
        let data = values.iter().map(|v| *v as u8).collect();
        Self::new(name, Dtype::I8, shape, data)
    }

    /// All-zero tensor of the given dtype
    pub fn zeros(name: impl Into<String>, dtype: Dtype, shape: Vec<usize>) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            name: name.into(),
            dtype,
            data: vec![0u8; numel * dtype.size()],
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw little-endian element bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}
