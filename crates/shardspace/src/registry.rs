//! Named vector spaces under one root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::space::{stored_config, VectorSpace};
use crate::store::StorageConfig;

/// Owns a set of spaces by name. With a root path, each space lives in
/// `<root>/<name>` and existing spaces are reopened on construction.
pub struct SpaceRegistry {
    root: Option<PathBuf>,
    spaces: RwLock<HashMap<String, Arc<VectorSpace>>>,
}

impl SpaceRegistry {
    /// Volatile registry; spaces use in-memory tables.
    pub fn new() -> Self {
        Self { root: None, spaces: RwLock::new(HashMap::new()) }
    }

    pub fn with_path(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let registry = Self { root: Some(root), spaces: RwLock::new(HashMap::new()) };
        registry.load_existing()?;
        Ok(registry)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn has_space(&self, name: &str) -> bool {
        self.spaces.read().contains_key(name)
    }

    /// Space names, sorted.
    pub fn list_spaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.spaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a space. In a persistent registry the config's storage is
    /// replaced by the space's directory under the root.
    pub fn create_space(&self, mut config: SpaceConfig) -> Result<Arc<VectorSpace>> {
        let mut spaces = self.spaces.write();
        if spaces.contains_key(&config.name) {
            return Err(SpaceError::SpaceAlreadyExists(config.name));
        }
        if let Some(ref root) = self.root {
            config.storage = StorageConfig::directory(root.join(&config.name));
        }
        config.validate()?;
        let space = Arc::new(VectorSpace::open(config)?);
        spaces.insert(space.name().to_string(), Arc::clone(&space));
        Ok(space)
    }

    pub fn get(&self, name: &str) -> Result<Arc<VectorSpace>> {
        self.spaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SpaceError::SpaceNotFound(name.to_string()))
    }

    /// Run `f` against a space without cloning its handle.
    pub fn with_space<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&VectorSpace) -> R,
    {
        let spaces = self.spaces.read();
        let space = spaces.get(name).ok_or_else(|| SpaceError::SpaceNotFound(name.to_string()))?;
        Ok(f(space))
    }

    /// Destroy a space and forget it. Returns whether it existed.
    pub fn delete_space(&self, name: &str) -> bool {
        let removed = self.spaces.write().remove(name);
        match removed {
            Some(space) => {
                space.destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy every registered space.
    pub fn destroy_all(&self) {
        let drained: Vec<_> = self.spaces.write().drain().map(|(_, s)| s).collect();
        for space in drained {
            space.destroy();
        }
    }

    fn load_existing(&self) -> Result<()> {
        let Some(ref base) = self.root else {
            return Ok(());
        };
        for entry in std::fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let mut config = match stored_config(&dir) {
                Ok(Some(config)) => config,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable space manifest");
                    continue;
                }
            };
            config.storage = StorageConfig::directory(&dir);
            match VectorSpace::open(config) {
                Ok(space) => {
                    self.spaces.write().insert(space.name().to_string(), Arc::new(space));
                }
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to reopen space"),
            }
        }
        info!(root = %base.display(), spaces = self.spaces.read().len(), "loaded space registry");
        Ok(())
    }
}

impl Default for SpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
