//! Fixed-size records of the flat buffer: the model header and the per-layer
//! block descriptors. All fields are little-endian.

use crate::config::{ModelDims, TensorRole};
use crate::BitFlatError;

/// Size of the encoded model header in bytes
pub const HEADER_SIZE: usize = 32;

/// Size of one encoded block descriptor in bytes
pub const BLOCK_DESCRIPTOR_SIZE: usize = 40;

/// Model header, written at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelHeader {
    pub token_embedding_offset: u32,
    pub output_proj_offset: u32,
    /// Start of the per-layer tensor data (not the descriptor table)
    pub layers_offset: u32,
    /// Always 0
    pub reserved: u32,
    pub embedding_width: i32,
    pub vocabulary_size: i32,
    pub layer_count: i32,
    pub ffn_width: i32,
}

impl ModelHeader {
    /// Build a header from planned offsets and derived dims
    pub fn new(
        token_embedding_offset: u32,
        output_proj_offset: u32,
        layers_offset: u32,
        dims: &ModelDims,
    ) -> Self {
        // ModelDims::from_source rejects values above i32::MAX
        Self {
            token_embedding_offset,
            output_proj_offset,
            layers_offset,
            reserved: 0,
            embedding_width: dims.embedding_width as i32,
            vocabulary_size: dims.vocabulary_size as i32,
            layer_count: dims.layer_count as i32,
            ffn_width: dims.ffn_width as i32,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let words = [
            self.token_embedding_offset.to_le_bytes(),
            self.output_proj_offset.to_le_bytes(),
            self.layers_offset.to_le_bytes(),
            self.reserved.to_le_bytes(),
            self.embedding_width.to_le_bytes(),
            self.vocabulary_size.to_le_bytes(),
            self.layer_count.to_le_bytes(),
            self.ffn_width.to_le_bytes(),
        ];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(word);
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BitFlatError::InvalidBuffer(format!(
                "header needs {} bytes, buffer has {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let w = read_words::<8>(&bytes[..HEADER_SIZE]);
        Ok(Self {
            token_embedding_offset: w[0],
            output_proj_offset: w[1],
            layers_offset: w[2],
            reserved: w[3],
            embedding_width: w[4] as i32,
            vocabulary_size: w[5] as i32,
            layer_count: w[6] as i32,
            ffn_width: w[7] as i32,
        })
    }
}

/// Offsets of one transformer layer's ten tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockDescriptor {
    pub attn_norm_weight: u32,
    pub attn_norm_bias: u32,
    pub q_proj: u32,
    pub k_proj: u32,
    pub v_proj: u32,
    pub o_proj: u32,
    pub ffn_norm_weight: u32,
    pub ffn_norm_bias: u32,
    pub ffn_up_proj: u32,
    pub ffn_down_proj: u32,
}

impl BlockDescriptor {
    /// Build from offsets given in `TensorRole::LAYER_ROLES` order
    pub fn from_offsets(o: [u32; 10]) -> Self {
        Self {
            attn_norm_weight: o[0],
            attn_norm_bias: o[1],
            q_proj: o[2],
            k_proj: o[3],
            v_proj: o[4],
            o_proj: o[5],
            ffn_norm_weight: o[6],
            ffn_norm_bias: o[7],
            ffn_up_proj: o[8],
            ffn_down_proj: o[9],
        }
    }

    /// Offsets in `TensorRole::LAYER_ROLES` order
    pub fn offsets(&self) -> [u32; 10] {
        [
            self.attn_norm_weight,
            self.attn_norm_bias,
            self.q_proj,
            self.k_proj,
            self.v_proj,
            self.o_proj,
            self.ffn_norm_weight,
            self.ffn_norm_bias,
            self.ffn_up_proj,
            self.ffn_down_proj,
        ]
    }

    /// Offset of a per-layer tensor
    pub fn offset_of(&self, role: TensorRole) -> Option<u32> {
        role.descriptor_index().map(|i| self.offsets()[i])
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; BLOCK_DESCRIPTOR_SIZE];
        for (chunk, offset) in bytes.chunks_exact_mut(4).zip(self.offsets()) {
            chunk.copy_from_slice(&offset.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < BLOCK_DESCRIPTOR_SIZE {
            return Err(BitFlatError::InvalidBuffer(format!(
                "block descriptor needs {} bytes, got {}",
                BLOCK_DESCRIPTOR_SIZE,
                bytes.len()
            )));
        }
        Ok(Self::from_offsets(read_words::<10>(&bytes[..BLOCK_DESCRIPTOR_SIZE])))
    }
}

fn read_words<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}
