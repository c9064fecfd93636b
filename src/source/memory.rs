//! Map-backed tensor source.

use std::collections::{BTreeMap, BTreeSet};

use super::{SourceTensor, TensorSource};
use crate::BitFlatError;

/// Tensors held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    tensors: BTreeMap<String, SourceTensor>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor under its own name, replacing any previous one
    pub fn insert(&mut self, tensor: SourceTensor) -> Option<SourceTensor> {
        self.tensors.insert(tensor.name().to_string(), tensor)
    }

    /// Builder form of `insert`
    pub fn with_tensor(mut self, tensor: SourceTensor) -> Self {
        self.insert(tensor);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<SourceTensor> {
        self.tensors.remove(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceTensor> {
        self.tensors.values()
    }
}

impl FromIterator<SourceTensor> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = SourceTensor>>(iter: I) -> Self {
        let mut source = Self::new();
        for tensor in iter {
            source.insert(tensor);
        }
        source
    }
}

impl TensorSource for InMemorySource {
    fn keys(&self) -> BTreeSet<String> {
        self.tensors.keys().cloned().collect()
    }

    fn get(&self, key: &str) -> crate::Result<SourceTensor> {
        self.tensors
            .get(key)
            .cloned()
            .ok_or_else(|| BitFlatError::MissingTensor(key.to_string()))
    }

    fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    fn shape(&self, key: &str) -> crate::Result<Vec<usize>> {
        self.tensors
            .get(key)
            .map(|t| t.shape().to_vec())
            .ok_or_else(|| BitFlatError::MissingTensor(key.to_string()))
    }
}
