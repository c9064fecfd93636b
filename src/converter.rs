//! End-to-end conversion: open, derive, plan, emit, verify.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{ConfigHint, ConvertOptions, ModelDims};
use crate::layout::{BufferEmitter, FlatModelView, LayoutPlan, LayoutPlanner};
use crate::source::{SafeTensorsSource, TensorSource};
use crate::utils::format_bytes;
use crate::BitFlatError;

/// What a conversion produced
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub output: PathBuf,
    pub dims: ModelDims,
    pub tensors: usize,
    pub data_bytes: u64,
    pub bytes_written: u64,
    pub verified: bool,
}

/// Drives one conversion run
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
    planner: LayoutPlanner,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            planner: LayoutPlanner::new(),
        }
    }

    /// Convert a `.safetensors` file (or shard directory) into a flat model
    pub fn convert(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> crate::Result<ConversionSummary> {
        let input = input.as_ref();
        tracing::info!("Converting {:?}", input);

        let source = SafeTensorsSource::open(input)?;
        let dims = ModelDims::from_source(&source)?;

        if self.options.check_config {
            check_config(input, &dims);
        }

        self.write(&source, &dims, output.as_ref())
    }

    /// Convert from any tensor source
    pub fn convert_source<S: TensorSource + ?Sized>(
        &self,
        source: &S,
        output: impl AsRef<Path>,
    ) -> crate::Result<ConversionSummary> {
        let dims = ModelDims::from_source(source)?;
        self.write(source, &dims, output.as_ref())
    }

    fn write<S: TensorSource + ?Sized>(
        &self,
        source: &S,
        dims: &ModelDims,
        output: &Path,
    ) -> crate::Result<ConversionSummary> {
        // Planning fetches and checks every tensor before the file is created
        let plan = self.planner.plan(source, dims)?;

        let bytes_written = BufferEmitter::new()
            .with_progress(self.options.show_progress)
            .write_file(&plan, output)?;

        tracing::info!("Wrote {} to {:?}", format_bytes(bytes_written), output);

        let verified = if self.options.verify {
            verify_file(&plan, output)?;
            tracing::info!("Verified {:?}", output);
            true
        } else {
            false
        };

        let summary = ConversionSummary {
            output: output.to_path_buf(),
            dims: *dims,
            tensors: plan.entries().len(),
            data_bytes: plan.data_len(),
            bytes_written,
            verified,
        };
        if let Ok(json) = serde_json::to_string(&summary) {
            tracing::debug!("Summary: {}", json);
        }

        Ok(summary)
    }
}

/// Re-read a written file and check it against the plan it came from
pub fn verify_file(plan: &LayoutPlan, path: impl AsRef<Path>) -> crate::Result<()> {
    let file = std::fs::File::open(path.as_ref())?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };

    if mmap.len() as u64 != plan.total_len() {
        return Err(BitFlatError::LayoutMismatch(format!(
            "file is {} bytes, planned {}",
            mmap.len(),
            plan.total_len()
        )));
    }

    let view = FlatModelView::parse(&mmap)?;
    if *view.header() != plan.header() {
        return Err(BitFlatError::LayoutMismatch(format!(
            "header on disk {:?} differs from plan {:?}",
            view.header(),
            plan.header()
        )));
    }
    if view.blocks() != plan.blocks() {
        return Err(BitFlatError::LayoutMismatch(
            "block descriptors on disk differ from plan".to_string(),
        ));
    }

    Ok(())
}

/// Warn when a config.json next to the weights disagrees with derived dims
fn check_config(input: &Path, dims: &ModelDims) {
    let dir = if input.is_dir() {
        Some(input)
    } else {
        input.parent()
    };
    let Some(config_path) = dir.map(|d| d.join("config.json")).filter(|p| p.exists()) else {
        return;
    };

    match ConfigHint::from_file(&config_path) {
        Ok(hint) => {
            for mismatch in dims.mismatches(&hint) {
                tracing::warn!("{}", mismatch);
            }
        }
        Err(e) => tracing::warn!("Ignoring unreadable {:?}: {}", config_path, e),
    }
}
