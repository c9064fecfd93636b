//! Model dimensions recovered from the weight tensors themselves.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::TensorRole;
use crate::source::keys::{discover_layer_indices, TensorKey};
use crate::source::TensorSource;
use crate::BitFlatError;

/// Scalar model dimensions written into the flat header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDims {
    /// Embedding width (hidden size)
    pub embedding_width: usize,
    /// Vocabulary size
    pub vocabulary_size: usize,
    /// Number of transformer layers
    pub layer_count: usize,
    /// Feed-forward inner width
    pub ffn_width: usize,
}

impl ModelDims {
    /// Derive dimensions by inspecting tensor shapes.
    ///
    /// - embedding width and vocabulary size come from the token embedding
    ///   (`[vocab, dim]`)
    /// - layer count is the number of distinct layer indices carrying a
    ///   query projection
    /// - ffn width is the first dimension of layer 0's up projection, or 0
    ///   when there are no layers
    pub fn from_source<S: TensorSource + ?Sized>(source: &S) -> crate::Result<Self> {
        let embed_key = TensorKey::global(TensorRole::TokenEmbedding).resolve(source)?;
        let embed_shape = source.shape(&embed_key)?;
        if embed_shape.len() != 2 {
            return Err(BitFlatError::UnsupportedShape {
                key: embed_key,
                reason: format!("expected [vocab, dim], got {:?}", embed_shape),
            });
        }

        let vocabulary_size = checked_dim(&embed_key, embed_shape[0])?;
        let embedding_width = checked_dim(&embed_key, embed_shape[1])?;

        let indices = discover_layer_indices(&source.keys());
        let layer_count = checked_dim("layers", indices.len())?;
        if let Some(&last) = indices.iter().next_back() {
            if last + 1 != layer_count {
                tracing::warn!(
                    "Layer numbering is sparse: {} layers found, highest index {}",
                    layer_count,
                    last
                );
            }
        }

        let ffn_width = if layer_count == 0 {
            tracing::warn!("No transformer layers found, emitting an embedding-only model");
            0
        } else {
            let up_key = TensorKey::layer(TensorRole::FfnUpProj, 0).resolve(source)?;
            let up_shape = source.shape(&up_key)?;
            match up_shape.first() {
                Some(&rows) if up_shape.len() == 2 => checked_dim(&up_key, rows)?,
                _ => {
                    return Err(BitFlatError::UnsupportedShape {
                        key: up_key,
                        reason: format!("expected [ffn_dim, dim], got {:?}", up_shape),
                    })
                }
            }
        };

        let dims = Self {
            embedding_width,
            vocabulary_size,
            layer_count,
            ffn_width,
        };
        tracing::info!(
            "Derived dims: dim={} vocab={} layers={} ffn_dim={}",
            dims.embedding_width,
            dims.vocabulary_size,
            dims.layer_count,
            dims.ffn_width
        );

        Ok(dims)
    }

    /// Compare against a `config.json` shipped with the weights.
    ///
    /// Returns one message per field that disagrees; fields absent from the
    /// config are skipped.
    pub fn mismatches(&self, config: &ConfigHint) -> Vec<String> {
        let pairs = [
            ("hidden_size", config.hidden_size, self.embedding_width),
            ("vocab_size", config.vocab_size, self.vocabulary_size),
            ("num_hidden_layers", config.num_hidden_layers, self.layer_count),
            ("intermediate_size", config.intermediate_size, self.ffn_width),
        ];

        pairs
            .iter()
            .filter_map(|(field, declared, derived)| match declared {
                Some(declared) if declared != derived => Some(format!(
                    "{}: config.json says {}, tensors say {}",
                    field, declared, derived
                )),
                _ => None,
            })
            .collect()
    }
}

fn checked_dim(key: &str, value: usize) -> crate::Result<usize> {
    if value > i32::MAX as usize {
        return Err(BitFlatError::UnsupportedShape {
            key: key.to_string(),
            reason: format!("dimension {} does not fit in a 32-bit header field", value),
        });
    }
    Ok(value)
}

/// The subset of a HuggingFace `config.json` used to sanity-check derived dims
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigHint {
    #[serde(default)]
    pub hidden_size: Option<usize>,
    #[serde(default)]
    pub vocab_size: Option<usize>,
    #[serde(default)]
    pub num_hidden_layers: Option<usize>,
    #[serde(default)]
    pub intermediate_size: Option<usize>,
}

impl ConfigHint {
    /// Load from a config.json file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConfigHint = serde_json::from_str(&content)?;
        Ok(config)
    }
}
