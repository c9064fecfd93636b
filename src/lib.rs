//! # rs-bitflat
//!
//! Converts transformer weights stored as safetensors into a single flat
//! binary image that a native inference engine can use in place: one read,
//! then every tensor is addressed by a byte offset.
//!
//! ## Pipeline
//!
//! - **Derive**: recover model dims from tensor shapes (`ModelDims`)
//! - **Plan**: order tensors and compute every offset up front (`LayoutPlanner`)
//! - **Emit**: cast to f32 / i8 and write header, data, descriptors (`BufferEmitter`)
//!
//! ## Example
//!
//! ```no_run
//! use rs_bitflat::{ConvertOptions, Converter};
//!
//! fn main() -> rs_bitflat::Result<()> {
//!     let summary = Converter::new(ConvertOptions::default())
//!         .convert("model.safetensors", "model.flat")?;
//!     println!("{} bytes", summary.bytes_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod converter;
pub mod layout;
pub mod quantization;
pub mod source;
pub mod utils;

// Re-exports for convenience
pub use config::{ConvertOptions, ModelDims, PrecisionPolicy, TargetDtype, TensorRole};
pub use converter::{ConversionSummary, Converter};
pub use layout::{BlockDescriptor, BufferEmitter, FlatModelView, LayoutPlan, LayoutPlanner, ModelHeader};
pub use source::{InMemorySource, SafeTensorsSource, SourceTensor, TensorSource};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum BitFlatError {
    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Unsupported shape for {key}: {reason}")]
    UnsupportedShape { key: String, reason: String },

    #[error("Unsupported dtype {dtype} for {key}")]
    UnsupportedDtype { key: String, dtype: String },

    #[error("Offset {offset} of {key} does not fit in 32 bits")]
    OffsetOverflow { key: String, offset: u64 },

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Invalid flat buffer: {0}")]
    InvalidBuffer(String),

    #[error("Tensor source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BitFlatError>;
