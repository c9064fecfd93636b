//! Typed tensor key builder.
//!
//! Tensor names follow the `tok_embeddings` / `layers.{N}.attention.wq`
//! convention. Exports that use the shorter `token_embd` / `layers.{N}.q_proj`
//! names are accepted as aliases.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::TensorRole;
use crate::BitFlatError;

use super::TensorSource;

/// Name of one tensor: a role, plus the layer index for per-layer roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorKey {
    pub role: TensorRole,
    pub layer: Option<usize>,
}

impl TensorKey {
    /// Key for the token embedding or output projection
    pub fn global(role: TensorRole) -> Self {
        debug_assert!(!role.is_layer_role(), "{:?} needs a layer index", role);
        Self { role, layer: None }
    }

    /// Key for a tensor inside transformer layer `index`
    pub fn layer(role: TensorRole, index: usize) -> Self {
        debug_assert!(role.is_layer_role(), "{:?} is not a layer tensor", role);
        Self {
            role,
            layer: Some(index),
        }
    }

    /// Primary tensor name
    pub fn canonical(&self) -> String {
        self.render(canonical_name(self.role))
    }

    /// Alternate tensor name, if the role has one
    pub fn alias(&self) -> Option<String> {
        alias_name(self.role).map(|name| self.render(name))
    }

    /// Find the name under which `source` stores this tensor.
    ///
    /// The canonical name wins when both are present.
    pub fn resolve<S: TensorSource + ?Sized>(&self, source: &S) -> crate::Result<String> {
        let canonical = self.canonical();
        if source.contains(&canonical) {
            return Ok(canonical);
        }

        if let Some(alias) = self.alias() {
            if source.contains(&alias) {
                tracing::debug!("Using alias {} for {}", alias, canonical);
                return Ok(alias);
            }
        }

        Err(BitFlatError::MissingTensor(canonical))
    }

    fn render(&self, name: &str) -> String {
        match self.layer {
            Some(index) => format!("layers.{}.{}", index, name),
            None => name.to_string(),
        }
    }
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Canonical name of a per-layer tensor: `layers.{index}.{suffix}`
pub fn layer_key(role: TensorRole, index: usize) -> String {
    TensorKey::layer(role, index).canonical()
}

fn canonical_name(role: TensorRole) -> &'static str {
    match role {
        TensorRole::TokenEmbedding => "tok_embeddings.weight",
        TensorRole::OutputProjection => "output.weight",
        TensorRole::AttnNormWeight => "attention_norm.weight",
        TensorRole::AttnNormBias => "attention_norm.bias",
        TensorRole::QProj => "attention.wq.weight",
        TensorRole::KProj => "attention.wk.weight",
        TensorRole::VProj => "attention.wv.weight",
        TensorRole::OProj => "attention.wo.weight",
        TensorRole::FfnNormWeight => "ffn_norm.weight",
        TensorRole::FfnNormBias => "ffn_norm.bias",
        TensorRole::FfnUpProj => "feed_forward.w1.weight",
        TensorRole::FfnDownProj => "feed_forward.w2.weight",
    }
}

fn alias_name(role: TensorRole) -> Option<&'static str> {
    match role {
        TensorRole::TokenEmbedding => Some("token_embd.weight"),
        TensorRole::OutputProjection => Some("output_proj.weight"),
        TensorRole::AttnNormWeight => Some("attn_norm.weight"),
        TensorRole::AttnNormBias => Some("attn_norm.bias"),
        TensorRole::QProj => Some("q_proj.weight"),
        TensorRole::KProj => Some("k_proj.weight"),
        TensorRole::VProj => Some("v_proj.weight"),
        TensorRole::OProj => Some("o_proj.weight"),
        TensorRole::FfnNormWeight | TensorRole::FfnNormBias => None,
        TensorRole::FfnUpProj => Some("ffn_up_proj.weight"),
        TensorRole::FfnDownProj => Some("ffn_down_proj.weight"),
    }
}

/// Split `layers.{N}.{rest}` into `(N, rest)`
pub fn parse_layer_key(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix("layers.")?;
    let (index, suffix) = rest.split_once('.')?;
    let index = index.parse::<usize>().ok()?;
    Some((index, suffix))
}

/// Distinct layer indices that carry a query projection.
///
/// Numbering may be sparse; every index found is reported.
pub fn discover_layer_indices<'a>(keys: impl IntoIterator<Item = &'a String>) -> BTreeSet<usize> {
    let canonical = canonical_name(TensorRole::QProj);
    let alias = alias_name(TensorRole::QProj);

    keys.into_iter()
        .filter_map(|name| parse_layer_key(name))
        .filter(|(_, suffix)| *suffix == canonical || Some(*suffix) == alias)
        .map(|(index, _)| index)
        .collect()
}
