//! Derives the standard on-disk directory layout from configuration:
//!
//! ```text
//! {root}/manifest/
//! {root}/kvs/{inst}/{current|update|redundancy|recovery}/
//! {root}/fs/{inst}/{current|backup|initial|update}/
//! {root}/fs/{inst}/.metadata/
//! ```

use crate::error::Error;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// The four KVS-side directory categories.
pub const KVS_CATEGORIES: [&str; 4] = ["current", "update", "redundancy", "recovery"];

/// The four FileStorage-side directory categories.
pub const FS_CATEGORIES: [&str; 4] = ["current", "backup", "initial", "update"];

/// Which instance-relative tree `create_storage_structure` should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Kvs,
    FileStorage,
}

/// Strips a single leading path separator from an instance specifier.
pub fn normalize_instance(inst: &str) -> &str {
    inst.strip_prefix('/').unwrap_or(inst)
}

/// Caches `central_storage_uri` after first resolution.
pub struct PathManager {
    root: RwLock<Option<PathBuf>>,
}

impl PathManager {
    pub fn new() -> Self {
        PathManager { root: RwLock::new(None) }
    }

    /// Resolves (and caches) the root directory from `central_storage_uri`.
    pub fn root(&self, central_storage_uri: &str) -> Result<PathBuf, Error> {
        if let Some(cached) = self.root.read()?.as_ref() {
            return Ok(cached.clone());
        }
        let resolved = PathBuf::from(central_storage_uri);
        *self.root.write()? = Some(resolved.clone());
        Ok(resolved)
    }

    /// Test-only hook that clears the cached root so a new
    /// `central_storage_uri` takes effect.
    pub fn reset_cache(&self) {
        *self.root.write().expect("path manager lock poisoned") = None;
    }

    pub fn manifest_path(&self, central_storage_uri: &str) -> Result<PathBuf, Error> {
        Ok(self.root(central_storage_uri)?.join("manifest"))
    }

    pub fn kvs_root(&self, central_storage_uri: &str) -> Result<PathBuf, Error> {
        Ok(self.root(central_storage_uri)?.join("kvs"))
    }

    pub fn fs_root(&self, central_storage_uri: &str) -> Result<PathBuf, Error> {
        Ok(self.root(central_storage_uri)?.join("fs"))
    }

    pub fn kvs_instance_path(&self, central_storage_uri: &str, inst: &str) -> Result<PathBuf, Error> {
        Ok(self.kvs_root(central_storage_uri)?.join(normalize_instance(inst)))
    }

    pub fn fs_instance_path(&self, central_storage_uri: &str, inst: &str) -> Result<PathBuf, Error> {
        Ok(self.fs_root(central_storage_uri)?.join(normalize_instance(inst)))
    }

    pub fn fs_metadata_path(&self, central_storage_uri: &str, inst: &str) -> Result<PathBuf, Error> {
        Ok(self.fs_instance_path(central_storage_uri, inst)?.join(".metadata"))
    }

    /// Creates the appropriate set of subdirectories for `kind` under the
    /// instance's path. Idempotent.
    pub fn create_storage_structure(
        &self,
        central_storage_uri: &str,
        inst: &str,
        kind: StorageKind,
    ) -> Result<PathBuf, Error> {
        let (base, categories): (PathBuf, &[&str]) = match kind {
            StorageKind::Kvs => (self.kvs_instance_path(central_storage_uri, inst)?, &KVS_CATEGORIES),
            StorageKind::FileStorage => {
                (self.fs_instance_path(central_storage_uri, inst)?, &FS_CATEGORIES)
            }
        };
        std::fs::create_dir_all(&base)?;
        for category in categories {
            std::fs::create_dir_all(base.join(category))?;
        }
        if kind == StorageKind::FileStorage {
            std::fs::create_dir_all(base.join(".metadata"))?;
        }
        Ok(base)
    }

    /// Ensures the manifest directory exists.
    pub fn create_manifest_structure(&self, central_storage_uri: &str) -> Result<PathBuf, Error> {
        let path = self.manifest_path(central_storage_uri)?;
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn path_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

impl Default for PathManager {
    fn default() -> Self {
        Self::new()
    }
}
