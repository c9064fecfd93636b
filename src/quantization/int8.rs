//! i8 target: projection matrices.
//!
//! Out-of-range values wrap. Floats are truncated toward zero (NaN becomes
//! 0, infinities saturate to the i64 range first) and the low 8 bits are
//! kept, so 130.0 is stored as -126 (0x82). Integer sources keep their low
//! 8 bits directly. The rule is the same for every i8 field in the buffer.

use candle_core::DType;
use safetensors::Dtype;

use super::float::via_candle;
use super::{le_chunks, unsupported, PrecisionCast};
use crate::config::TargetDtype;
use crate::source::SourceTensor;

/// Cast to 8-bit signed integer with wrap-around
#[derive(Debug, Clone, Copy, Default)]
pub struct Int8Cast;

impl PrecisionCast for Int8Cast {
    fn target(&self) -> TargetDtype {
        TargetDtype::I8
    }

    fn cast(&self, tensor: &SourceTensor) -> crate::Result<Vec<u8>> {
        let values = to_i8(tensor)?;
        Ok(values.into_iter().map(|v| v as u8).collect())
    }
}

/// Truncate a float toward zero and wrap it into the i8 range
pub fn wrap_to_i8(value: f64) -> i8 {
    // `as i64` truncates, saturates, and maps NaN to 0; `as i8` keeps the low byte
    (value as i64) as i8
}

/// Decode every element of a tensor and cast it to i8
pub fn to_i8(tensor: &SourceTensor) -> crate::Result<Vec<i8>> {
    let data = tensor.data();

    let values: Vec<i8> = match tensor.dtype() {
        Dtype::I8 => data.iter().map(|b| *b as i8).collect(),
        Dtype::U8 => data.iter().map(|b| *b as i8).collect(),
        Dtype::I16 => le_chunks::<2>(data).map(|b| i16::from_le_bytes(b) as i8).collect(),
        Dtype::U16 => le_chunks::<2>(data).map(|b| u16::from_le_bytes(b) as i8).collect(),
        Dtype::I32 => le_chunks::<4>(data).map(|b| i32::from_le_bytes(b) as i8).collect(),
        Dtype::U32 => le_chunks::<4>(data).map(|b| u32::from_le_bytes(b) as i8).collect(),
        Dtype::I64 => le_chunks::<8>(data).map(|b| i64::from_le_bytes(b) as i8).collect(),
        Dtype::U64 => le_chunks::<8>(data).map(|b| u64::from_le_bytes(b) as i8).collect(),
        Dtype::F32 => le_chunks::<4>(data)
            .map(|b| wrap_to_i8(f32::from_le_bytes(b) as f64))
            .collect(),
        Dtype::F64 => le_chunks::<8>(data)
            .map(|b| wrap_to_i8(f64::from_le_bytes(b)))
            .collect(),
        Dtype::F16 => via_candle(tensor, DType::F16)?
            .into_iter()
            .map(|v| wrap_to_i8(v as f64))
            .collect(),
        Dtype::BF16 => via_candle(tensor, DType::BF16)?
            .into_iter()
            .map(|v| wrap_to_i8(v as f64))
            .collect(),
        _ => return Err(unsupported(tensor)),
    };

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_values() {
        let tensor = SourceTensor::from_f32("w", vec![4], &[2.0, -3.0, 0.0, 127.0]).unwrap();
        let bytes = Int8Cast.cast(&tensor).unwrap();
        assert_eq!(bytes, vec![0x02, 0xFD, 0x00, 0x7F]);
    }

    #[test]
    fn test_truncates_toward_zero() {
        assert_eq!(wrap_to_i8(2.9), 2);
        assert_eq!(wrap_to_i8(-2.9), -2);
        assert_eq!(wrap_to_i8(0.49), 0);
    }

    #[test]
    fn test_out_of_range_wraps() {
        assert_eq!(wrap_to_i8(130.0), -126);
        assert_eq!(wrap_to_i8(130.0) as u8, 0x82);
        assert_eq!(wrap_to_i8(-129.0), 127);
        assert_eq!(wrap_to_i8(256.0), 0);
        assert_eq!(wrap_to_i8(f64::NAN), 0);
        assert_eq!(wrap_to_i8(f64::INFINITY), -1);
    }

    #[test]
    fn test_integer_sources_wrap() {
        let data = [130i32, -129, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let tensor = SourceTensor::new("w", Dtype::I32, vec![3], data).unwrap();
        assert_eq!(to_i8(&tensor).unwrap(), vec![-126, 127, 5]);

        let tensor = SourceTensor::new("w", Dtype::U8, vec![2], vec![200, 7]).unwrap();
        assert_eq!(to_i8(&tensor).unwrap(), vec![-56, 7]);
    }

    #[test]
    fn test_i8_passthrough() {
        let tensor = SourceTensor::from_i8("w", vec![2, 2], &[-128, -1, 0, 127]).unwrap();
        assert_eq!(Int8Cast.cast(&tensor).unwrap(), tensor.data());
    }

    #[test]
    fn test_half_precision_source() {
        // 130.0 and 2.0 in IEEE half precision
        let halves: [u16; 2] = [0x5810, 0x4000];
        let data = halves.iter().flat_map(|h| h.to_le_bytes()).collect();
        let tensor = SourceTensor::new("w", Dtype::F16, vec![2], data).unwrap();
        assert_eq!(to_i8(&tensor).unwrap(), vec![-126, 2]);
    }
}
