//! Flat buffer layout: planning, emission, and read-back.
//!
//! ```text
//! +--------------------+ 0
//! | ModelHeader (32 B) |
//! +--------------------+ 32 = token_embedding_offset
//! | embedding  (f32)   |
//! | output     (i8)    |
//! +--------------------+ layers_offset
//! | layer 0 tensors    |
//! | ...                |
//! | layer N-1 tensors  |
//! +--------------------+ len - 40 * N
//! | BlockDescriptor x N|
//! +--------------------+
//! ```

mod emitter;
mod header;
mod planner;
mod reader;

#[cfg(test)]
pub(crate) mod fixtures;

pub use emitter::BufferEmitter;
pub use header::{BlockDescriptor, ModelHeader, BLOCK_DESCRIPTOR_SIZE, HEADER_SIZE};
pub use planner::{LayoutPlan, LayoutPlanner, PlanEntry};
pub use reader::FlatModelView;
