//! Small helpers shared by the library and the CLI.

mod size;

pub use size::format_bytes;
