//! Row stores: fixed-width vector tables keyed by `u64`, in memory or on disk.

mod file_store;
mod memory;
mod row_codec;

pub use file_store::{atomic_write, FileRowStore};
pub use memory::MemoryRowStore;

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Durable key -> vector table with a fixed column count.
///
/// Implementations reject wrong-length vectors before touching storage.
pub trait RowStore: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// Insert a new row; fails with `DuplicateKey` if `key` exists.
    fn create(&mut self, key: u64, vector: &[f32]) -> Result<()>;
    /// Overwrite an existing row; fails with `NotFound` if `key` is absent.
    fn update(&mut self, key: u64, vector: &[f32]) -> Result<()>;
    /// Remove a row, returning whether one existed.
    fn delete(&mut self, key: u64) -> Result<bool>;
    fn get(&self, key: u64) -> Result<Vec<f32>>;
    fn contains(&self, key: u64) -> bool;
    fn count(&self) -> usize;
    /// Every row, ascending by key.
    fn dump(&self) -> Result<Vec<(u64, Vec<f32>)>>;
    /// Remove the table and its backing data.
    fn drop_table(&mut self) -> Result<()>;
}

/// Where a space keeps its tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Volatile tables, lost when the space is dropped.
    #[default]
    Memory,
    /// One record log per table inside `path`.
    Directory {
        path: PathBuf,
        /// fsync after every appended record.
        #[serde(default)]
        sync_writes: bool,
    },
}

impl StorageConfig {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory { path: path.into(), sync_writes: false }
    }

    pub fn root(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::Directory { path, .. } => Some(path),
        }
    }
}

/// Opened storage backing one space: hands out tables and owns the
/// space's own directory.
#[derive(Debug, Clone)]
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        if let Some(root) = config.root() {
            std::fs::create_dir_all(root)?;
        }
        Ok(Self { config: config.clone() })
    }

    pub fn root(&self) -> Option<&Path> {
        self.config.root()
    }

    pub fn is_persistent(&self) -> bool {
        self.root().is_some()
    }

    /// Open (or create) the table `name` with `dimensions` columns.
    pub fn open_table(&self, name: &str, dimensions: usize) -> Result<Box<dyn RowStore>> {
        match &self.config {
            StorageConfig::Memory => Ok(Box::new(MemoryRowStore::new(name, dimensions))),
            StorageConfig::Directory { path, sync_writes } => {
                let table = FileRowStore::open(path, name, dimensions, *sync_writes)?;
                Ok(Box::new(table))
            }
        }
    }

    /// Remove the files this space created (`<space>_*` tables and temp
    /// files, plus the manifest), then the directory itself once it is empty.
    /// Anything else in the directory is left alone.
    pub fn release(&self, space: &str, manifest: &str) -> Result<()> {
        let Some(root) = self.root() else {
            return Ok(());
        };
        if !root.exists() {
            return Ok(());
        }
        let table_prefix = format!("{space}_");
        let manifest_tmp = Path::new(manifest).with_extension("tmp");
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = entry.file_name();
            let owned = match file_name.to_str() {
                Some(name) if name == manifest || Path::new(name) == manifest_tmp.as_path() => true,
                Some(name) => {
                    name.starts_with(&table_prefix)
                        && matches!(path.extension().and_then(|e| e.to_str()), Some("rows" | "tmp"))
                }
                None => false,
            };
            if owned {
                std::fs::remove_file(&path)?;
            }
        }
        if std::fs::read_dir(root)?.next().is_none() {
            std::fs::remove_dir(root)?;
            debug!(path = %root.display(), "released space storage");
        } else {
            warn!(path = %root.display(), "space directory holds foreign files, leaving it in place");
        }
        Ok(())
    }
}
