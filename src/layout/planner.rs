//! Layout planning: emission order and byte offsets of every tensor.

use crate::config::{ModelDims, PrecisionPolicy, TargetDtype, TensorRole};
use crate::quantization::is_castable;
use crate::source::{SourceTensor, TensorKey, TensorSource};
use crate::BitFlatError;

use super::header::{BlockDescriptor, ModelHeader, BLOCK_DESCRIPTOR_SIZE, HEADER_SIZE};

/// One tensor placed in the data region
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Name the tensor was found under in the source
    pub key: String,
    pub role: TensorRole,
    pub layer: Option<usize>,
    pub target: TargetDtype,
    /// Absolute byte offset from the start of the file
    pub offset: u32,
    /// Byte length after casting to `target`
    pub length: u64,
    /// Resident copy of the source tensor
    pub tensor: SourceTensor,
}

impl PlanEntry {
    /// First byte past this entry
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length
    }
}

/// Complete placement of a model: every entry, the header offsets, and one
/// block descriptor per layer.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    entries: Vec<PlanEntry>,
    token_embedding_offset: u32,
    output_proj_offset: u32,
    layers_offset: u32,
    blocks: Vec<BlockDescriptor>,
    dims: ModelDims,
}

impl LayoutPlan {
    /// Header record for this plan
    pub fn header(&self) -> ModelHeader {
        ModelHeader::new(
            self.token_embedding_offset,
            self.output_proj_offset,
            self.layers_offset,
            &self.dims,
        )
    }

    /// Entries in emission order
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Block descriptors in ascending layer order
    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    pub fn dims(&self) -> &ModelDims {
        &self.dims
    }

    pub fn layers_offset(&self) -> u32 {
        self.layers_offset
    }

    /// Total bytes of tensor data
    pub fn data_len(&self) -> u64 {
        self.entries.iter().map(|e| e.length).sum()
    }

    /// Offset of the block descriptor table (end of the data region)
    pub fn descriptor_table_offset(&self) -> u64 {
        HEADER_SIZE as u64 + self.data_len()
    }

    /// Size of the complete output file
    pub fn total_len(&self) -> u64 {
        self.descriptor_table_offset() + (BLOCK_DESCRIPTOR_SIZE * self.blocks.len()) as u64
    }

    /// Check that entries are packed back to back starting right after the
    /// header.
    pub fn check_contiguous(&self) -> crate::Result<()> {
        let mut expected = HEADER_SIZE as u64;
        for entry in &self.entries {
            if entry.offset as u64 != expected {
                return Err(BitFlatError::LayoutMismatch(format!(
                    "{} placed at {}, expected {}",
                    entry.key, entry.offset, expected
                )));
            }
            expected = entry.end();
        }
        Ok(())
    }
}

/// Computes a `LayoutPlan` in a single forward pass.
///
/// Order: token embedding (f32), output projection (i8), then for each layer
/// the ten per-layer tensors in `TensorRole::LAYER_ROLES` order. No padding
/// is inserted between tensors.
#[derive(Debug, Clone, Default)]
pub struct LayoutPlanner {
    policy: PrecisionPolicy,
}

impl LayoutPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch, validate, and place every tensor of the model.
    ///
    /// Nothing is written here; any missing key, bad shape, or uncastable
    /// dtype is reported before an output file exists.
    pub fn plan<S: TensorSource + ?Sized>(
        &self,
        source: &S,
        dims: &ModelDims,
    ) -> crate::Result<LayoutPlan> {
        let mut cursor = Cursor {
            offset: HEADER_SIZE as u64,
            entries: Vec::with_capacity(2 + dims.layer_count * TensorRole::LAYER_ROLES.len()),
        };

        let token_embedding_offset =
            self.place(&mut cursor, source, dims, TensorKey::global(TensorRole::TokenEmbedding))?;
        let output_proj_offset =
            self.place(&mut cursor, source, dims, TensorKey::global(TensorRole::OutputProjection))?;
        let layers_offset = to_offset("layers", cursor.offset)?;

        let mut blocks = Vec::with_capacity(dims.layer_count);
        for layer in 0..dims.layer_count {
            let mut offsets = [0u32; 10];
            for (slot, role) in offsets.iter_mut().zip(TensorRole::LAYER_ROLES) {
                *slot = self.place(&mut cursor, source, dims, TensorKey::layer(role, layer))?;
            }
            blocks.push(BlockDescriptor::from_offsets(offsets));
        }

        let plan = LayoutPlan {
            entries: cursor.entries,
            token_embedding_offset,
            output_proj_offset,
            layers_offset,
            blocks,
            dims: *dims,
        };

        tracing::info!(
            "Planned {} tensors, {} data bytes, {} total",
            plan.entries.len(),
            plan.data_len(),
            plan.total_len()
        );

        Ok(plan)
    }

    fn place<S: TensorSource + ?Sized>(
        &self,
        cursor: &mut Cursor,
        source: &S,
        dims: &ModelDims,
        key: TensorKey,
    ) -> crate::Result<u32> {
        let name = key.resolve(source)?;
        let tensor = source.get(&name)?;

        check_shape(key.role, &tensor, dims)?;
        if !is_castable(tensor.dtype()) {
            return Err(BitFlatError::UnsupportedDtype {
                key: name,
                dtype: format!("{:?}", tensor.dtype()),
            });
        }

        let target = self.policy.target_for(key.role);
        let offset = to_offset(&name, cursor.offset)?;
        let length = (tensor.numel() * target.size_in_bytes()) as u64;

        tracing::debug!(
            "{} {:?} {:?} -> {:?} at {} ({} bytes)",
            name,
            tensor.shape(),
            tensor.dtype(),
            target,
            offset,
            length
        );

        cursor.offset += length;
        cursor.entries.push(PlanEntry {
            key: name,
            role: key.role,
            layer: key.layer,
            target,
            offset,
            length,
            tensor,
        });

        Ok(offset)
    }
}

struct Cursor {
    offset: u64,
    entries: Vec<PlanEntry>,
}

fn to_offset(key: &str, offset: u64) -> crate::Result<u32> {
    u32::try_from(offset).map_err(|_| BitFlatError::OffsetOverflow {
        key: key.to_string(),
        offset,
    })
}

/// Reject tensors whose shape does not fit the fixed block structure
fn check_shape(role: TensorRole, tensor: &SourceTensor, dims: &ModelDims) -> crate::Result<()> {
    let shape = tensor.shape();
    let fail = |reason: String| {
        Err(BitFlatError::UnsupportedShape {
            key: tensor.name().to_string(),
            reason,
        })
    };

    match role {
        _ if role.is_norm() => {
            if tensor.numel() != dims.embedding_width {
                return fail(format!(
                    "norm vector {:?} should hold {} elements",
                    shape, dims.embedding_width
                ));
            }
        }
        TensorRole::OutputProjection => {
            if shape.len() != 2 || tensor.numel() != dims.vocabulary_size * dims.embedding_width {
                return fail(format!(
                    "expected a [{}, {}] matrix, got {:?}",
                    dims.vocabulary_size, dims.embedding_width, shape
                ));
            }
        }
        TensorRole::QProj | TensorRole::KProj | TensorRole::VProj | TensorRole::OProj => {
            expect_matrix(shape, [dims.embedding_width, dims.embedding_width]).or_else(fail)?;
        }
        TensorRole::FfnUpProj => {
            expect_matrix(shape, [dims.ffn_width, dims.embedding_width]).or_else(fail)?;
        }
        TensorRole::FfnDownProj => {
            expect_matrix(shape, [dims.embedding_width, dims.ffn_width]).or_else(fail)?;
        }
        _ => {
            if shape.len() != 2 {
                return fail(format!("expected a rank-2 matrix, got {:?}", shape));
            }
        }
    }

    Ok(())
}

fn expect_matrix(shape: &[usize], expected: [usize; 2]) -> Result<(), String> {
    if *shape != expected {
        return Err(format!("expected a {:?} matrix, got {:?}", expected, shape));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::fixtures::tiny_source;
    use crate::source::{layer_key, InMemorySource};
    use safetensors::Dtype;

    fn plan_for(source: &InMemorySource) -> crate::Result<LayoutPlan> {
        let dims = ModelDims::from_source(source)?;
        LayoutPlanner::new().plan(source, &dims)
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let plan = plan_for(&tiny_source(4, 2, 3, 8)).unwrap();
        plan.check_contiguous().unwrap();

        let entries = plan.entries();
        assert_eq!(entries[0].offset as usize, HEADER_SIZE);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].offset as u64, pair[0].offset as u64 + pair[0].length);
        }
        assert_eq!(entries.len(), 2 + 3 * 10);
    }

    #[test]
    fn test_header_offsets() {
        let plan = plan_for(&tiny_source(4, 2, 1, 8)).unwrap();
        let header = plan.header();

        assert_eq!(header.token_embedding_offset, 32);
        assert_eq!(header.output_proj_offset, 32 + 4 * 2 * 4);
        assert_eq!(header.layers_offset, 32 + 32 + 8);
        assert_eq!(header.layers_offset, plan.blocks()[0].attn_norm_weight);
        assert_eq!(header.reserved, 0);
        assert_eq!(
            (header.embedding_width, header.vocabulary_size, header.layer_count, header.ffn_width),
            (4, 2, 1, 8)
        );
    }

    #[test]
    fn test_emission_order_and_precision() {
        let plan = plan_for(&tiny_source(4, 2, 2, 8)).unwrap();
        let entries = plan.entries();

        assert_eq!(entries[0].role, TensorRole::TokenEmbedding);
        assert_eq!(entries[0].target, TargetDtype::F32);
        assert_eq!(entries[1].role, TensorRole::OutputProjection);
        assert_eq!(entries[1].target, TargetDtype::I8);

        for (i, entry) in entries[2..].iter().enumerate() {
            assert_eq!(entry.layer, Some(i / 10));
            assert_eq!(entry.role, TensorRole::LAYER_ROLES[i % 10]);
        }
        assert_eq!(entries[2 + 2].key, "layers.0.attention.wq.weight");
        assert_eq!(entries[2 + 2].length, 16);
        assert_eq!(entries[2 + 10 + 8].key, "layers.1.feed_forward.w1.weight");
        assert_eq!(entries[2 + 10 + 8].length, 32);
    }

    #[test]
    fn test_descriptors_match_entries() {
        let plan = plan_for(&tiny_source(4, 2, 2, 8)).unwrap();
        for (layer, block) in plan.blocks().iter().enumerate() {
            let offsets = block.offsets();
            assert!(offsets.windows(2).all(|w| w[0] < w[1]));
            for (i, offset) in offsets.iter().enumerate() {
                assert_eq!(plan.entries()[2 + layer * 10 + i].offset, *offset);
            }
        }
    }

    #[test]
    fn test_total_length() {
        let plan = plan_for(&tiny_source(4, 2, 1, 8)).unwrap();
        // 32 header + 32 embed + 8 output + 4 norms * 16 + 4 attn * 16 + 2 ffn * 32 + 40 descriptor
        assert_eq!(plan.data_len(), 32 + 8 + 64 + 64 + 64);
        assert_eq!(plan.total_len(), 32 + 232 + 40);
        assert_eq!(plan.descriptor_table_offset(), 32 + 232);
    }

    #[test]
    fn test_zero_layers() {
        let plan = plan_for(&tiny_source(4, 2, 0, 8)).unwrap();
        assert!(plan.blocks().is_empty());
        assert_eq!(plan.entries().len(), 2);
        assert_eq!(plan.layers_offset(), 32 + 32 + 8);
        assert_eq!(plan.total_len(), 32 + 32 + 8);
    }

    #[test]
    fn test_missing_output_projection() {
        let mut source = tiny_source(4, 2, 1, 8);
        source.remove("output.weight");
        match plan_for(&source) {
            Err(BitFlatError::MissingTensor(key)) => assert_eq!(key, "output.weight"),
            other => panic!("expected missing tensor, got {:?}", other.map(|p| p.total_len())),
        }
    }

    #[test]
    fn test_sparse_layers_fail_on_gap() {
        let mut source = tiny_source(4, 2, 2, 8);
        for role in TensorRole::LAYER_ROLES {
            let t = source.remove(&layer_key(role, 1)).unwrap();
            let renamed = SourceTensor::new(layer_key(role, 3), t.dtype(), t.shape().to_vec(), t.data().to_vec());
            source.insert(renamed.unwrap());
        }
        assert!(matches!(
            plan_for(&source),
            Err(BitFlatError::MissingTensor(ref k)) if k == "layers.1.attention_norm.weight"
        ));
    }

    #[test]
    fn test_norm_shape_checked() {
        let mut source = tiny_source(4, 2, 1, 8);
        source.insert(SourceTensor::zeros(layer_key(TensorRole::FfnNormBias, 0), Dtype::F32, vec![5]));
        assert!(matches!(
            plan_for(&source),
            Err(BitFlatError::UnsupportedShape { ref key, .. }) if key == "layers.0.ffn_norm.bias"
        ));
    }

    #[test]
    fn test_projection_rank_checked() {
        let mut source = tiny_source(4, 2, 1, 8);
        source.insert(SourceTensor::zeros(layer_key(TensorRole::KProj, 0), Dtype::F32, vec![16]));
        assert!(matches!(plan_for(&source), Err(BitFlatError::UnsupportedShape { .. })));
    }

    #[test]
    fn test_attention_projections_must_be_square() {
        for role in [TensorRole::QProj, TensorRole::KProj, TensorRole::VProj, TensorRole::OProj] {
            let mut source = tiny_source(4, 2, 1, 8);
            // grouped-query sized k/v, or any other non-square shape
            source.insert(SourceTensor::zeros(layer_key(role, 0), Dtype::F32, vec![2, 4]));
            assert!(matches!(
                plan_for(&source),
                Err(BitFlatError::UnsupportedShape { ref key, .. }) if *key == layer_key(role, 0)
            ));
        }
    }

    #[test]
    fn test_ffn_down_shape_checked() {
        let mut source = tiny_source(4, 2, 1, 8);
        source.insert(SourceTensor::zeros(layer_key(TensorRole::FfnDownProj, 0), Dtype::F32, vec![3, 5]));
        assert!(matches!(plan_for(&source), Err(BitFlatError::UnsupportedShape { .. })));

        // transposed
        source.insert(SourceTensor::zeros(layer_key(TensorRole::FfnDownProj, 0), Dtype::F32, vec![8, 4]));
        assert!(matches!(
            plan_for(&source),
            Err(BitFlatError::UnsupportedShape { ref key, .. }) if key == "layers.0.feed_forward.w2.weight"
        ));
    }

    #[test]
    fn test_ffn_up_width_checked() {
        let mut source = tiny_source(4, 2, 2, 8);
        source.insert(SourceTensor::zeros(layer_key(TensorRole::FfnUpProj, 1), Dtype::F32, vec![8, 3]));
        assert!(matches!(
            plan_for(&source),
            Err(BitFlatError::UnsupportedShape { ref key, .. }) if key == "layers.1.feed_forward.w1.weight"
        ));
    }

    #[test]
    fn test_offset_overflow() {
        assert_eq!(to_offset("x", u32::MAX as u64).unwrap(), u32::MAX);
        match to_offset("layers.9.attention.wq.weight", u32::MAX as u64 + 1) {
            Err(BitFlatError::OffsetOverflow { key, offset }) => {
                assert_eq!(key, "layers.9.attention.wq.weight");
                assert_eq!(offset, 1 << 32);
            }
            other => panic!("expected offset overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_uncastable_dtype_rejected() {
        let mut source = tiny_source(4, 2, 1, 8);
        source.insert(SourceTensor::zeros(layer_key(TensorRole::VProj, 0), Dtype::BOOL, vec![4, 4]));
        assert!(matches!(plan_for(&source), Err(BitFlatError::UnsupportedDtype { .. })));
    }

    #[test]
    fn test_aliases_resolve_to_same_layout() {
        let canonical = plan_for(&tiny_source(4, 2, 1, 8)).unwrap();

        let mut aliased = InMemorySource::new();
        for tensor in tiny_source(4, 2, 1, 8).iter() {
            let name = tensor
                .name()
                .replace("tok_embeddings", "token_embd")
                .replace("attention.wq", "q_proj")
                .replace("feed_forward.w1", "ffn_up_proj");
            aliased.insert(
                SourceTensor::new(name, tensor.dtype(), tensor.shape().to_vec(), tensor.data().to_vec())
                    .unwrap(),
            );
        }
        let plan = plan_for(&aliased).unwrap();

        assert_eq!(plan.header(), canonical.header());
        assert_eq!(plan.blocks(), canonical.blocks());
        assert_eq!(plan.entries()[0].key, "token_embd.weight");
    }
}
