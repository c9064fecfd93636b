//! Memory-mapped safetensors archive, single file or a directory of shards.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use safetensors::{Dtype, SafeTensors};

use super::{SourceTensor, TensorSource};
use crate::BitFlatError;

struct Shard {
    path: PathBuf,
    mmap: Mmap,
}

#[derive(Debug, Clone)]
struct TensorMeta {
    shard: usize,
    dtype: Dtype,
    shape: Vec<usize>,
    /// Byte range of the tensor data within the shard file
    range: Range<usize>,
}

/// Read-only view over one or more `.safetensors` files.
pub struct SafeTensorsSource {
    shards: Vec<Shard>,
    index: BTreeMap<String, TensorMeta>,
}

impl SafeTensorsSource {
    /// Open a `.safetensors` file, or every `.safetensors` file in a directory
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();

        let files = if path.is_dir() {
            find_safetensor_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        if files.is_empty() {
            return Err(BitFlatError::Source(format!(
                "No safetensor files found in {:?}",
                path
            )));
        }

        let mut shards = Vec::with_capacity(files.len());
        let mut index = BTreeMap::new();

        for (shard_idx, shard_path) in files.into_iter().enumerate() {
            tracing::debug!("Mapping shard: {:?}", shard_path);

            let file = std::fs::File::open(&shard_path)?;
            let mmap = unsafe { Mmap::map(&file)? };

            let tensors = SafeTensors::deserialize(&mmap)
                .map_err(|e| BitFlatError::Source(format!("{:?}: {}", shard_path, e)))?;

            let base = mmap.as_ptr() as usize;
            for (name, view) in tensors.tensors() {
                // Views borrow straight from the mapping
                let start = view.data().as_ptr() as usize - base;
                let meta = TensorMeta {
                    shard: shard_idx,
                    dtype: view.dtype(),
                    shape: view.shape().to_vec(),
                    range: start..start + view.data().len(),
                };
                if index.insert(name.clone(), meta).is_some() {
                    tracing::warn!("Tensor {} appears in more than one shard, using {:?}", name, shard_path);
                }
            }

            shards.push(Shard {
                path: shard_path,
                mmap,
            });
        }

        tracing::info!("Opened {} shard(s) with {} tensors", shards.len(), index.len());

        Ok(Self { shards, index })
    }

    /// Number of mapped shard files
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Source dtype of a tensor
    pub fn dtype(&self, key: &str) -> crate::Result<Dtype> {
        self.meta(key).map(|m| m.dtype)
    }

    fn meta(&self, key: &str) -> crate::Result<&TensorMeta> {
        self.index
            .get(key)
            .ok_or_else(|| BitFlatError::MissingTensor(key.to_string()))
    }
}

impl TensorSource for SafeTensorsSource {
    fn keys(&self) -> BTreeSet<String> {
        self.index.keys().cloned().collect()
    }

    fn get(&self, key: &str) -> crate::Result<SourceTensor> {
        let meta = self.meta(key)?;
        let shard = &self.shards[meta.shard];

        let data = shard.mmap.get(meta.range.clone()).ok_or_else(|| {
            BitFlatError::Source(format!(
                "{} in {:?}: bytes {:?} outside the mapping",
                key, shard.path, meta.range
            ))
        })?;

        SourceTensor::new(key, meta.dtype, meta.shape.clone(), data.to_vec())
    }

    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn shape(&self, key: &str) -> crate::Result<Vec<usize>> {
        self.meta(key).map(|m| m.shape.clone())
    }
}

fn find_safetensor_files(dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "safetensors") {
            files.push(path);
        }
    }

    // Shard names sort in load order (model-00001-of-00002, ...)
    files.sort();
    Ok(files)
}
