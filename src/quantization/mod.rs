//! Precision casting to the flat buffer's on-disk element types.
//!
//! Two targets exist:
//! - f32: value-preserving for f32 sources, widening for f16/bf16
//! - i8: truncation with two's-complement wrap for out-of-range values

mod float;
mod int8;

pub use float::{to_f32, F32Cast};
pub use int8::{to_i8, wrap_to_i8, Int8Cast};

use safetensors::Dtype;

use crate::config::TargetDtype;
use crate::source::SourceTensor;
use crate::BitFlatError;

/// Conversion from a source tensor to raw on-disk element bytes
pub trait PrecisionCast: Send + Sync {
    /// Element type produced by this cast
    fn target(&self) -> TargetDtype;

    /// Cast every element, returning little-endian bytes
    fn cast(&self, tensor: &SourceTensor) -> crate::Result<Vec<u8>>;
}

/// Get the caster for a target dtype
pub fn caster_for(target: TargetDtype) -> &'static dyn PrecisionCast {
    match target {
        TargetDtype::F32 => &F32Cast,
        TargetDtype::I8 => &Int8Cast,
    }
}

/// Cast a tensor to the given target dtype
pub fn cast_tensor(tensor: &SourceTensor, target: TargetDtype) -> crate::Result<Vec<u8>> {
    caster_for(target).cast(tensor)
}

/// Whether tensors stored as `dtype` can be cast to either target
pub fn is_castable(dtype: Dtype) -> bool {
    matches!(
        dtype,
        Dtype::F16
            | Dtype::BF16
            | Dtype::F32
            | Dtype::F64
            | Dtype::I8
            | Dtype::U8
            | Dtype::I16
            | Dtype::U16
            | Dtype::I32
            | Dtype::U32
            | Dtype::I64
            | Dtype::U64
    )
}

fn unsupported(tensor: &SourceTensor) -> BitFlatError {
    BitFlatError::UnsupportedDtype {
        key: tensor.name().to_string(),
        dtype: format!("{:?}", tensor.dtype()),
    }
}

/// Fixed-size little-endian element chunks of a raw buffer
fn le_chunks<const N: usize>(data: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    data.chunks_exact(N).map(|chunk| {
        let mut buf = [0u8; N];
        buf.copy_from_slice(chunk);
        buf
    })
}
