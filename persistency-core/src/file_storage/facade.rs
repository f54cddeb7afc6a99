//! Per-instance file registry tracking each file's provenance, checksum,
//! and open/closed state. Delegates whole-buffer moves to
//! [`crate::file_storage::backend::FileStorageBackend`]; this layer only
//! owns open-file bookkeeping, timestamps, and recover/reset.

use crate::checksum::{checksum, ChecksumType};
use crate::error::Error;
use crate::file_storage::backend::{Category, FileStorageBackend};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

/// How a file's `current/` copy most recently came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Created,
    Modified,
    Restored,
    Recovered,
}

/// Per-entry registry record: timestamps, size, provenance, checksum, and
/// the open/closed flag that makes open-while-open and delete-while-open
/// return `ResourceBusy`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub accessed_at: SystemTime,
    pub size: u64,
    pub provenance: Provenance,
    pub checksum_type: ChecksumType,
    pub checksum: String,
    pub open: bool,
}

/// Read-only, write-only, or read-write — mirrors the facade's three
/// open-entry points; stream semantics themselves stay out of scope, so
/// this only gates registry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

pub struct FileStorageFacade {
    backend: FileStorageBackend,
    checksum_type: ChecksumType,
    registry: RwLock<HashMap<String, FileInfo>>,
}

impl FileStorageFacade {
    pub fn new(backend: FileStorageBackend, checksum_type: ChecksumType) -> Self {
        FileStorageFacade { backend, checksum_type, registry: RwLock::new(HashMap::new()) }
    }

    fn make_info(&self, bytes: &[u8], provenance: Provenance) -> FileInfo {
        let now = SystemTime::now();
        FileInfo {
            created_at: now,
            modified_at: now,
            accessed_at: now,
            size: bytes.len() as u64,
            provenance,
            checksum_type: self.checksum_type,
            checksum: checksum(self.checksum_type, bytes),
            open: false,
        }
    }

    pub fn get_all_file_names(&self) -> Result<Vec<String>, Error> {
        self.backend.list(Category::Current)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.backend.exists(name, Category::Current)
    }

    /// Writes `bytes` to `current/`, registering the entry with `Created`
    /// provenance on first write and `Modified` on subsequent ones.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        {
            let registry = self.registry.read()?;
            if registry.get(name).map(|info| info.open).unwrap_or(false) {
                return Err(Error::ResourceBusy(format!("{} is open", name)));
            }
        }
        let existed = self.backend.exists(name, Category::Current);
        self.backend.write(name, bytes, Category::Current)?;

        let mut registry = self.registry.write()?;
        let provenance = if existed { Provenance::Modified } else { Provenance::Created };
        let mut info = self.make_info(bytes, provenance);
        if let Some(prior) = registry.get(name) {
            info.created_at = prior.created_at;
        }
        registry.insert(name.to_string(), info);
        Ok(())
    }

    /// Deleting an absent file is success-if-absent at this layer: only
    /// the backend call distinguishes "never existed" with
    /// `FileNotFound`, the facade just confirms it's gone.
    pub fn delete_file(&self, name: &str) -> Result<(), Error> {
        {
            let registry = self.registry.read()?;
            if registry.get(name).map(|info| info.open).unwrap_or(false) {
                return Err(Error::ResourceBusy(format!("{} is open", name)));
            }
        }
        match self.backend.delete(name, Category::Current) {
            Ok(()) | Err(Error::FileNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.registry.write()?.remove(name);
        Ok(())
    }

    /// Copies `backup/{name}` over `current/{name}` and re-registers with
    /// `Restored` provenance.
    pub fn recover_file(&self, name: &str) -> Result<(), Error> {
        if !self.backend.exists(name, Category::Backup) {
            return Err(Error::FileNotFound(format!("{} has no backup copy", name)));
        }
        self.backend.copy(name, Category::Backup, Category::Current)?;
        let bytes = self.backend.read(name, Category::Current)?;
        let mut registry = self.registry.write()?;
        registry.insert(name.to_string(), self.make_info(&bytes, Provenance::Restored));
        Ok(())
    }

    /// Copies `initial/{name}` over `current/{name}` and re-registers with
    /// `Recovered` provenance.
    pub fn reset_file(&self, name: &str) -> Result<(), Error> {
        if !self.backend.exists(name, Category::Initial) {
            return Err(Error::FileNotFound(format!("{} has no initial copy", name)));
        }
        self.backend.copy(name, Category::Initial, Category::Current)?;
        let bytes = self.backend.read(name, Category::Current)?;
        let mut registry = self.registry.write()?;
        registry.insert(name.to_string(), self.make_info(&bytes, Provenance::Recovered));
        Ok(())
    }

    pub fn get_file_size(&self, name: &str) -> Result<u64, Error> {
        self.backend.size(name, Category::Current)
    }

    pub fn get_file_info(&self, name: &str) -> Result<FileInfo, Error> {
        self.registry
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(format!("{} is not registered", name)))
    }

    fn open(&self, name: &str, mode: OpenMode) -> Result<(), Error> {
        if mode != OpenMode::WriteOnly && !self.backend.exists(name, Category::Current) {
            return Err(Error::FileNotFound(name.to_string()));
        }
        let mut registry = self.registry.write()?;
        if let Some(info) = registry.get(name) {
            if info.open {
                return Err(Error::ResourceBusy(format!("{} is already open", name)));
            }
        }
        let bytes = self.backend.read(name, Category::Current).unwrap_or_default();
        let entry = registry.entry(name.to_string()).or_insert_with(|| self.make_info(&bytes, Provenance::Created));
        entry.open = true;
        entry.accessed_at = SystemTime::now();
        Ok(())
    }

    pub fn open_for_read(&self, name: &str) -> Result<(), Error> {
        self.open(name, OpenMode::ReadOnly)
    }

    pub fn open_for_write(&self, name: &str) -> Result<(), Error> {
        self.open(name, OpenMode::WriteOnly)
    }

    pub fn open_for_read_write(&self, name: &str) -> Result<(), Error> {
        self.open(name, OpenMode::ReadWrite)
    }

    pub fn close(&self, name: &str) -> Result<(), Error> {
        let mut registry = self.registry.write()?;
        if let Some(info) = registry.get_mut(name) {
            info.open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade() -> (tempfile::TempDir, FileStorageFacade) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorageBackend::new(dir.path());
        (dir, FileStorageFacade::new(backend, ChecksumType::Crc32))
    }

    #[test]
    fn write_tracks_created_then_modified_provenance() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"first").unwrap();
        assert_eq!(f.get_file_info("a.txt").unwrap().provenance, Provenance::Created);

        f.write_file("a.txt", b"second").unwrap();
        assert_eq!(f.get_file_info("a.txt").unwrap().provenance, Provenance::Modified);
    }

    #[test]
    fn open_while_open_is_resource_busy() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"data").unwrap();
        f.open_for_read("a.txt").unwrap();
        assert!(matches!(f.open_for_read("a.txt"), Err(Error::ResourceBusy(_))));
        f.close("a.txt").unwrap();
        assert!(f.open_for_read("a.txt").is_ok());
    }

    #[test]
    fn delete_while_open_is_resource_busy() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"data").unwrap();
        f.open_for_read("a.txt").unwrap();
        assert!(matches!(f.delete_file("a.txt"), Err(Error::ResourceBusy(_))));
        f.close("a.txt").unwrap();
        assert!(f.delete_file("a.txt").is_ok());
    }

    #[test]
    fn recover_copies_backup_over_current() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"current-version").unwrap();
        f.backend.write("a.txt", b"backup-version", Category::Backup).unwrap();

        f.recover_file("a.txt").unwrap();
        assert_eq!(f.backend.read("a.txt", Category::Current).unwrap(), b"backup-version");
        assert_eq!(f.get_file_info("a.txt").unwrap().provenance, Provenance::Restored);
    }

    #[test]
    fn reset_copies_initial_over_current() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"current-version").unwrap();
        f.backend.write("a.txt", b"initial-version", Category::Initial).unwrap();

        f.reset_file("a.txt").unwrap();
        assert_eq!(f.backend.read("a.txt", Category::Current).unwrap(), b"initial-version");
        assert_eq!(f.get_file_info("a.txt").unwrap().provenance, Provenance::Recovered);
    }

    #[test]
    fn delete_missing_file_is_success_if_absent() {
        let (_dir, f) = facade();
        assert!(f.delete_file("never-written.txt").is_ok());
    }

    #[test]
    fn recover_without_backup_fails() {
        let (_dir, f) = facade();
        f.write_file("a.txt", b"data").unwrap();
        assert!(matches!(f.recover_file("a.txt"), Err(Error::FileNotFound(_))));
    }
}
