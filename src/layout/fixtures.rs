//! Synthetic models shared by layout tests.

use safetensors::Dtype;

use crate::config::TensorRole;
use crate::source::{layer_key, InMemorySource, SourceTensor};

/// All-zero f32 model with the canonical tensor names
pub(crate) fn tiny_source(dim: usize, vocab: usize, layers: usize, ffn: usize) -> InMemorySource {
    let mut source = InMemorySource::new();
    source.insert(SourceTensor::zeros("tok_embeddings.weight", Dtype::F32, vec![vocab, dim]));
    source.insert(SourceTensor::zeros("output.weight", Dtype::F32, vec![vocab, dim]));
    for l in 0..layers {
        for role in TensorRole::LAYER_ROLES {
            let shape = match role {
                _ if role.is_norm() => vec![dim],
                TensorRole::FfnUpProj => vec![ffn, dim],
                TensorRole::FfnDownProj => vec![dim, ffn],
                _ => vec![dim, dim],
            };
            source.insert(SourceTensor::zeros(layer_key(role, l), Dtype::F32, shape));
        }
    }
    source
}

/// Model whose every element is distinct, so misplaced bytes show up
pub(crate) fn counting_source(dim: usize, vocab: usize, layers: usize, ffn: usize) -> InMemorySource {
    let mut next = 0.0f32;
    tiny_source(dim, vocab, layers, ffn)
        .iter()
        .map(|t| {
            let values: Vec<f32> = (0..t.numel())
                .map(|_| {
                    next += 1.0;
                    next % 100.0
                })
                .collect();
            SourceTensor::from_f32(t.name(), t.shape().to_vec(), &values).unwrap()
        })
        .collect()
}
