//! Sequential writer for a planned flat buffer.

use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::quantization::cast_tensor;
use crate::BitFlatError;

use super::header::HEADER_SIZE;
use super::planner::LayoutPlan;

/// Writes header, tensor data, and descriptor table in one forward pass.
///
/// Every offset is already resolved by the planner, so nothing is seeked or
/// patched after the fact.
#[derive(Debug, Clone, Default)]
pub struct BufferEmitter {
    show_progress: bool,
}

impl BufferEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a progress bar over the planned tensors
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Create (or truncate) `path` and write the buffer into it.
    ///
    /// A failure part-way leaves a truncated file behind; callers must not
    /// treat it as a valid model.
    pub fn write_file(&self, plan: &LayoutPlan, path: impl AsRef<Path>) -> crate::Result<u64> {
        let path = path.as_ref();
        tracing::info!("Writing flat model to {:?}", path);

        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        let written = self.emit(plan, &mut writer)?;
        writer.flush()?;

        Ok(written)
    }

    /// Write the buffer to any byte sink, returning the number of bytes written
    pub fn emit<W: Write>(&self, plan: &LayoutPlan, writer: &mut W) -> crate::Result<u64> {
        writer.write_all(&plan.header().to_bytes())?;
        let mut written = HEADER_SIZE as u64;

        let pb = if self.show_progress {
            let pb = ProgressBar::new(plan.entries().len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} Writing tensors")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        for entry in plan.entries() {
            if written != entry.offset as u64 {
                return Err(BitFlatError::LayoutMismatch(format!(
                    "{} planned at {} but stream is at {}",
                    entry.key, entry.offset, written
                )));
            }

            let bytes = cast_tensor(&entry.tensor, entry.target)?;
            if bytes.len() as u64 != entry.length {
                return Err(BitFlatError::LayoutMismatch(format!(
                    "{} cast to {} bytes, planned {}",
                    entry.key,
                    bytes.len(),
                    entry.length
                )));
            }

            writer.write_all(&bytes)?;
            written += entry.length;
            pb.inc(1);
        }

        for block in plan.blocks() {
            writer.write_all(&block.to_bytes())?;
        }
        written += (plan.blocks().len() * super::header::BLOCK_DESCRIPTOR_SIZE) as u64;
        pb.finish_and_clear();

        if written != plan.total_len() {
            return Err(BitFlatError::LayoutMismatch(format!(
                "wrote {} bytes, planned {}",
                written,
                plan.total_len()
            )));
        }

        tracing::debug!("Emitted {} bytes ({} descriptors)", written, plan.blocks().len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelDims, TensorRole};
    use crate::layout::fixtures::{counting_source, tiny_source};
    use crate::layout::{BlockDescriptor, LayoutPlanner, ModelHeader};
    use crate::source::{layer_key, SourceTensor, TensorSource};

    fn emit_source<S: TensorSource>(source: &S) -> (LayoutPlan, Vec<u8>) {
        let dims = ModelDims::from_source(source).unwrap();
        let plan = LayoutPlanner::new().plan(source, &dims).unwrap();
        let mut out = Vec::new();
        let written = BufferEmitter::new().emit(&plan, &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
        (plan, out)
    }

    #[test]
    fn test_end_to_end_sizes() {
        let (plan, out) = emit_source(&tiny_source(4, 2, 1, 8));

        let lengths: u64 = plan.entries().iter().map(|e| e.length).sum();
        assert_eq!(out.len() as u64, 32 + lengths + 40);
        assert_eq!(out.len(), 304);

        let header = ModelHeader::from_bytes(&out).unwrap();
        assert_eq!(header, plan.header());
        assert_eq!(
            (header.embedding_width, header.vocabulary_size, header.layer_count, header.ffn_width),
            (4, 2, 1, 8)
        );

        let block = BlockDescriptor::from_bytes(&out[out.len() - 40..]).unwrap();
        assert_eq!(block, plan.blocks()[0]);
        assert!(block.offsets().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_layer_output() {
        let (_, out) = emit_source(&tiny_source(4, 2, 0, 8));
        assert_eq!(out.len(), 32 + 4 * 2 * 4 + 2 * 4);

        let header = ModelHeader::from_bytes(&out).unwrap();
        assert_eq!(header.layer_count, 0);
        assert_eq!(header.ffn_width, 0);
        assert_eq!(header.layers_offset as usize, out.len());
    }

    #[test]
    fn test_data_lands_at_planned_offsets() {
        let source = counting_source(4, 3, 2, 8);
        let (plan, out) = emit_source(&source);

        let embed = &plan.entries()[0];
        let expected = source.get("tok_embeddings.weight").unwrap();
        let start = embed.offset as usize;
        assert_eq!(&out[start..start + embed.length as usize], expected.data());

        let v = plan.blocks()[1].v_proj as usize;
        let v_src = crate::quantization::to_i8(&source.get(&layer_key(TensorRole::VProj, 1)).unwrap())
            .unwrap();
        let v_out: Vec<i8> = out[v..v + 16].iter().map(|b| *b as i8).collect();
        assert_eq!(v_out, v_src);
    }

    #[test]
    fn test_int8_rule_applies_to_every_field() {
        let mut source = tiny_source(2, 2, 1, 2);
        let values = [2.0f32, 130.0, -129.0, 0.0];
        source.insert(SourceTensor::from_f32("output.weight", vec![2, 2], &values).unwrap());
        source.insert(
            SourceTensor::from_f32(layer_key(TensorRole::OProj, 0), vec![2, 2], &values).unwrap(),
        );
        let (plan, out) = emit_source(&source);

        let out_proj = plan.header().output_proj_offset as usize;
        let o_proj = plan.blocks()[0].o_proj as usize;
        assert_eq!(&out[out_proj..out_proj + 4], &[0x02, 0x82, 0x7F, 0x00]);
        assert_eq!(&out[o_proj..o_proj + 4], &[0x02, 0x82, 0x7F, 0x00]);
    }

    #[test]
    fn test_emission_is_deterministic() {
        let source = counting_source(4, 2, 1, 8);
        let (_, first) = emit_source(&source);
        let (_, second) = emit_source(&source);
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.flat");
        let source = tiny_source(4, 2, 2, 8);
        let dims = ModelDims::from_source(&source).unwrap();
        let plan = LayoutPlanner::new().plan(&source, &dims).unwrap();

        let written = BufferEmitter::new().write_file(&plan, &path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
        assert_eq!(written, plan.total_len());
    }
}
