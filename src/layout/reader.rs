//! Read-side view of an emitted flat buffer.
//!
//! Mirrors what the inference engine does at load time: take the header at
//! offset 0, find the descriptor table at the end of the buffer, and address
//! tensors by offset. `parse` validates every offset before handing out
//! slices.

use crate::config::TensorRole;
use crate::BitFlatError;

use super::header::{BlockDescriptor, ModelHeader, BLOCK_DESCRIPTOR_SIZE, HEADER_SIZE};

/// Borrowed, validated view over a flat model buffer
#[derive(Debug, Clone)]
pub struct FlatModelView<'a> {
    bytes: &'a [u8],
    header: ModelHeader,
    blocks: Vec<BlockDescriptor>,
    table_offset: usize,
}

impl<'a> FlatModelView<'a> {
    pub fn parse(bytes: &'a [u8]) -> crate::Result<Self> {
        let header = ModelHeader::from_bytes(bytes)?;

        if header.reserved != 0 {
            return Err(invalid(format!("reserved field is {}, expected 0", header.reserved)));
        }
        let dims = [
            ("embedding_width", header.embedding_width),
            ("vocabulary_size", header.vocabulary_size),
            ("layer_count", header.layer_count),
            ("ffn_width", header.ffn_width),
        ];
        for (name, value) in dims {
            if value < 0 {
                return Err(invalid(format!("{} is negative ({})", name, value)));
            }
        }

        let layer_count = header.layer_count as usize;
        let table_len = layer_count as u64 * BLOCK_DESCRIPTOR_SIZE as u64;
        let len = bytes.len() as u64;
        if len < HEADER_SIZE as u64 + table_len {
            return Err(invalid(format!(
                "{} bytes cannot hold a header and {} block descriptors",
                len, layer_count
            )));
        }
        let table_offset = (len - table_len) as usize;

        let matrix = header.vocabulary_size as u64 * header.embedding_width as u64;
        expect_offset("token embedding", header.token_embedding_offset, HEADER_SIZE as u64)?;
        expect_offset("output projection", header.output_proj_offset, HEADER_SIZE as u64 + matrix * 4)?;
        expect_offset(
            "layer data",
            header.layers_offset,
            header.output_proj_offset as u64 + matrix,
        )?;
        if header.layers_offset as usize > table_offset {
            return Err(invalid(format!(
                "layer data starts at {} past the descriptor table at {}",
                header.layers_offset, table_offset
            )));
        }
        if layer_count == 0 && header.layers_offset as usize != table_offset {
            return Err(invalid(format!(
                "{} trailing bytes after the data region of a model without layers",
                table_offset - header.layers_offset as usize
            )));
        }

        let blocks = bytes[table_offset..]
            .chunks_exact(BLOCK_DESCRIPTOR_SIZE)
            .map(BlockDescriptor::from_bytes)
            .collect::<crate::Result<Vec<_>>>()?;

        let mut previous = header.layers_offset;
        for (layer, block) in blocks.iter().enumerate() {
            let offsets = block.offsets();
            if layer == 0 && offsets[0] != header.layers_offset {
                return Err(invalid(format!(
                    "layer 0 starts at {}, header says {}",
                    offsets[0], header.layers_offset
                )));
            }
            // Zero-sized tensors share an offset with their successor
            for offset in offsets {
                if offset < previous || offset as usize > table_offset {
                    return Err(invalid(format!(
                        "layer {} offset {} out of order or outside the data region",
                        layer, offset
                    )));
                }
                previous = offset;
            }
        }

        Ok(Self {
            bytes,
            header,
            blocks,
            table_offset,
        })
    }

    pub fn header(&self) -> &ModelHeader {
        &self.header
    }

    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    /// Offset where the block descriptor table begins
    pub fn descriptor_table_offset(&self) -> usize {
        self.table_offset
    }

    /// Token embedding table, `vocab * dim` floats
    pub fn token_embedding(&self) -> Vec<f32> {
        let start = self.header.token_embedding_offset as usize;
        decode_f32(&self.bytes[start..self.header.output_proj_offset as usize])
    }

    /// Output projection, `vocab * dim` bytes
    pub fn output_projection(&self) -> Vec<i8> {
        let start = self.header.output_proj_offset as usize;
        decode_i8(&self.bytes[start..self.header.layers_offset as usize])
    }

    /// Raw bytes of one per-layer tensor.
    ///
    /// A tensor extends to the next offset in the file: the following role of
    /// the same layer, the first role of the next layer, or the descriptor
    /// table.
    pub fn layer_tensor(&self, layer: usize, role: TensorRole) -> crate::Result<&'a [u8]> {
        let block = self
            .blocks
            .get(layer)
            .ok_or_else(|| invalid(format!("layer {} out of range ({} layers)", layer, self.blocks.len())))?;
        let index = role
            .descriptor_index()
            .ok_or_else(|| invalid(format!("{:?} is not a per-layer tensor", role)))?;

        let offsets = block.offsets();
        let start = offsets[index] as usize;
        let end = match offsets.get(index + 1) {
            Some(next) => *next as usize,
            None => self
                .blocks
                .get(layer + 1)
                .map(|b| b.attn_norm_weight as usize)
                .unwrap_or(self.table_offset),
        };

        Ok(&self.bytes[start..end])
    }

    /// Per-layer tensor decoded as f32 (norm weights and biases)
    pub fn layer_f32(&self, layer: usize, role: TensorRole) -> crate::Result<Vec<f32>> {
        Ok(decode_f32(self.layer_tensor(layer, role)?))
    }

    /// Per-layer tensor decoded as i8 (projection matrices)
    pub fn layer_i8(&self, layer: usize, role: TensorRole) -> crate::Result<Vec<i8>> {
        Ok(decode_i8(self.layer_tensor(layer, role)?))
    }
}

fn invalid(message: String) -> BitFlatError {
    BitFlatError::InvalidBuffer(message)
}

fn expect_offset(what: &str, actual: u32, expected: u64) -> crate::Result<()> {
    if actual as u64 != expected {
        return Err(invalid(format!(
            "{} offset is {}, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn decode_i8(bytes: &[u8]) -> Vec<i8> {
    bytes.iter().map(|b| *b as i8).collect()
}
