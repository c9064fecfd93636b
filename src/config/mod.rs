//! Configuration: model dimensions and the fixed precision policy.

mod model_config;
mod precision;

pub use model_config::{ConfigHint, ModelDims};
pub use precision::{PrecisionPolicy, TargetDtype, TensorRole};

/// Options controlling a single conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Re-read the written file and check it against the plan
    pub verify: bool,
    /// Show a progress bar while writing tensors
    pub show_progress: bool,
    /// Cross-check derived dims with a config.json next to the weights
    pub check_config: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            verify: false,
            show_progress: false,
            check_config: true,
        }
    }
}
