//! f32 target: embeddings and norm vectors.

use candle_core::{DType, Device, Tensor};
use safetensors::Dtype;

use super::{le_chunks, unsupported, PrecisionCast};
use crate::config::TargetDtype;
use crate::source::SourceTensor;

/// Cast to 32-bit float
#[derive(Debug, Clone, Copy, Default)]
pub struct F32Cast;

impl PrecisionCast for F32Cast {
    fn target(&self) -> TargetDtype {
        TargetDtype::F32
    }

    fn cast(&self, tensor: &SourceTensor) -> crate::Result<Vec<u8>> {
        let values = to_f32(tensor)?;
        Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }
}

/// Decode every element of a tensor as f32
pub fn to_f32(tensor: &SourceTensor) -> crate::Result<Vec<f32>> {
    let data = tensor.data();

    let values: Vec<f32> = match tensor.dtype() {
        Dtype::F32 => le_chunks::<4>(data).map(f32::from_le_bytes).collect(),
        Dtype::F16 => via_candle(tensor, DType::F16)?,
        Dtype::BF16 => via_candle(tensor, DType::BF16)?,
        Dtype::F64 => via_candle(tensor, DType::F64)?,
        Dtype::I8 => data.iter().map(|b| *b as i8 as f32).collect(),
        Dtype::U8 => data.iter().map(|b| *b as f32).collect(),
        Dtype::I16 => le_chunks::<2>(data).map(|b| i16::from_le_bytes(b) as f32).collect(),
        Dtype::U16 => le_chunks::<2>(data).map(|b| u16::from_le_bytes(b) as f32).collect(),
        Dtype::I32 => le_chunks::<4>(data).map(|b| i32::from_le_bytes(b) as f32).collect(),
        Dtype::U32 => le_chunks::<4>(data).map(|b| u32::from_le_bytes(b) as f32).collect(),
        Dtype::I64 => le_chunks::<8>(data).map(|b| i64::from_le_bytes(b) as f32).collect(),
        Dtype::U64 => le_chunks::<8>(data).map(|b| u64::from_le_bytes(b) as f32).collect(),
        _ => return Err(unsupported(tensor)),
    };

    Ok(values)
}

/// Half-precision and f64 sources go through candle's dtype conversion
pub(super) fn via_candle(tensor: &SourceTensor, dtype: DType) -> crate::Result<Vec<f32>> {
    if tensor.numel() == 0 {
        return Ok(Vec::new());
    }

    let t = Tensor::from_raw_buffer(tensor.data(), dtype, tensor.shape(), &Device::Cpu)?;
    let values = t.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    Ok(values)
}
