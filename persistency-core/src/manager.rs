//! The central persistency manager: instance registry, metadata
//! persistence, version-driven update decisions, and orchestration of
//! backup/rollback across backends. Expressed as an explicit-init object
//! rather than a lazily-initialised global singleton.

use crate::config::{DelegateKind, KvsBackendKind, PersistencyConfig};
use crate::error::Error;
use crate::file_storage::backend::{Category, FileStorageBackend};
use crate::file_storage::facade::FileStorageFacade;
use crate::kvs::backend::KvsBackend;
use crate::kvs::file_backend::FileKvsBackend;
use crate::kvs::shm_backend::ShmKvsBackend;
use crate::kvs::sqlite_backend::SqliteKvsBackend;
use crate::metadata::{now_epoch_secs, BackupDescriptor, FileStorageMetadata, StorageState};
use crate::path_manager::{PathManager, StorageKind};
use crate::replica::{ReplicaManager, ReplicaStatus};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A cached, openable KVS handle. Carries its own busy flag: busy state
/// is a field on the handle itself, not a lock held across the call.
pub struct KvsStorageHandle {
    backend: Box<dyn KvsBackend>,
    instance_root: PathBuf,
    busy: AtomicBool,
}

impl KvsStorageHandle {
    pub fn backend(&self) -> &dyn KvsBackend {
        self.backend.as_ref()
    }
}

/// A cached, openable FileStorage handle: the per-instance facade plus an
/// optional replica manager backing its current/ category.
pub struct FileStorageHandle {
    facade: FileStorageFacade,
    replica: Option<ReplicaManager>,
    instance_root: PathBuf,
    busy: AtomicBool,
}

impl FileStorageHandle {
    pub fn facade(&self) -> &FileStorageFacade {
        &self.facade
    }

    pub fn replica_manager(&self) -> Option<&ReplicaManager> {
        self.replica.as_ref()
    }
}

trait BusyFlag {
    fn busy_flag(&self) -> &AtomicBool;
}

impl BusyFlag for KvsStorageHandle {
    fn busy_flag(&self) -> &AtomicBool {
        &self.busy
    }
}

impl BusyFlag for FileStorageHandle {
    fn busy_flag(&self) -> &AtomicBool {
        &self.busy
    }
}

/// Runs `f` while holding the handle's busy flag; fails fast with
/// `ResourceBusy` if another lifecycle operation already holds it.
fn with_busy<T: BusyFlag, R>(handle: &Arc<T>, f: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    handle
        .busy_flag()
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map_err(|_| Error::ResourceBusy("storage is held by another lifecycle operation".to_string()))?;
    let result = f();
    handle.busy_flag().store(false, Ordering::SeqCst);
    result
}

/// Process-wide registry of storages. Embedding applications own one
/// instance, call [`PersistencyManager::init`] once at startup, and route
/// every `open`/lifecycle call through it; calling any storage `open`
/// before `init` returns `NotInitialized`.
pub struct PersistencyManager {
    initialized: AtomicBool,
    config: RwLock<Option<PersistencyConfig>>,
    path_manager: PathManager,
    fs_map: Mutex<HashMap<String, Arc<FileStorageHandle>>>,
    kvs_map: Mutex<HashMap<String, Arc<KvsStorageHandle>>>,
    metadata_cache: Mutex<HashMap<PathBuf, FileStorageMetadata>>,
}

impl PersistencyManager {
    pub fn new() -> Self {
        PersistencyManager {
            initialized: AtomicBool::new(false),
            config: RwLock::new(None),
            path_manager: PathManager::new(),
            fs_map: Mutex::new(HashMap::new()),
            kvs_map: Mutex::new(HashMap::new()),
            metadata_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Explicit initialisation: validates and stores the resolved
    /// configuration. Must be called before any `open`/lifecycle call.
    pub fn init(&self, config: PersistencyConfig) -> Result<(), Error> {
        config.validate()?;
        *self.config.write()? = Some(config);
        self.initialized.store(true, Ordering::SeqCst);
        info!("persistency manager initialized");
        Ok(())
    }

    /// Drops all cached handles and clears `initialized`. Does not delete
    /// on-disk state.
    pub fn shutdown(&self) {
        self.fs_map.lock().map(|mut m| m.clear()).ok();
        self.kvs_map.lock().map(|mut m| m.clear()).ok();
        self.metadata_cache.lock().map(|mut m| m.clear()).ok();
        self.initialized.store(false, Ordering::SeqCst);
        info!("persistency manager shut down");
    }

    fn ensure_initialized(&self) -> Result<PersistencyConfig, Error> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized("persistency manager has not been initialized".to_string()));
        }
        self.config
            .read()?
            .clone()
            .ok_or_else(|| Error::NotInitialized("persistency manager config missing".to_string()))
    }

    // ---- KVS storages --------------------------------------------------

    pub fn get_kvs_storage(
        &self,
        spec: &str,
        create: bool,
        backend_kind: Option<KvsBackendKind>,
    ) -> Result<Arc<KvsStorageHandle>, Error> {
        let config = self.ensure_initialized()?;

        if let Some(handle) = self.kvs_map.lock()?.get(spec) {
            if handle.busy.load(Ordering::SeqCst) {
                return Err(Error::ResourceBusy(format!("kvs storage {} is busy", spec)));
            }
            return Ok(handle.clone());
        }
        if !create {
            return Err(Error::StorageNotFound(spec.to_string()));
        }

        let instance_root =
            self.path_manager.create_storage_structure(&config.central_storage_uri, spec, StorageKind::Kvs)?;

        let metadata = self.load_or_init_metadata(&instance_root, || FileStorageMetadata::new_default(&config))?;
        self.save_metadata(&instance_root, &metadata)?;

        let kind = backend_kind.unwrap_or(config.kvs.backend_type);
        let backend = self.build_kvs_backend(&instance_root, spec, &config, kind)?;

        let handle = Arc::new(KvsStorageHandle { backend, instance_root, busy: AtomicBool::new(false) });
        self.kvs_map.lock()?.insert(spec.to_string(), handle.clone());
        info!("opened kvs storage {} (backend={:?})", spec, kind_name(kind));
        Ok(handle)
    }

    fn build_kvs_backend(
        &self,
        instance_root: &Path,
        spec: &str,
        config: &PersistencyConfig,
        kind: KvsBackendKind,
    ) -> Result<Box<dyn KvsBackend>, Error> {
        match kind {
            KvsBackendKind::File => Ok(Box::new(FileKvsBackend::open(instance_root)?)),
            KvsBackendKind::Sqlite => Ok(Box::new(SqliteKvsBackend::open(instance_root)?)),
            KvsBackendKind::Property => {
                let delegate: Option<Box<dyn KvsBackend>> = match config.kvs.property_backend_persistence {
                    DelegateKind::File => Some(Box::new(FileKvsBackend::open(instance_root)?)),
                    DelegateKind::Sqlite => Some(Box::new(SqliteKvsBackend::open(instance_root)?)),
                    DelegateKind::None => None,
                };
                Ok(Box::new(ShmKvsBackend::open(
                    instance_root,
                    spec,
                    config.kvs.property_backend_shm_size,
                    delegate,
                )?))
            }
        }
    }

    // ---- FileStorage instances ------------------------------------------

    pub fn get_file_storage(&self, spec: &str, create: bool) -> Result<Arc<FileStorageHandle>, Error> {
        let config = self.ensure_initialized()?;

        if let Some(handle) = self.fs_map.lock()?.get(spec) {
            if handle.busy.load(Ordering::SeqCst) {
                return Err(Error::ResourceBusy(format!("file storage {} is busy", spec)));
            }
            return Ok(handle.clone());
        }
        if !create {
            return Err(Error::StorageNotFound(spec.to_string()));
        }

        let instance_root = self.path_manager.create_storage_structure(
            &config.central_storage_uri,
            spec,
            StorageKind::FileStorage,
        )?;

        let metadata = self.load_or_init_metadata(&instance_root, || FileStorageMetadata::new_default(&config))?;
        self.save_metadata(&instance_root, &metadata)?;

        let backend = FileStorageBackend::new(instance_root.clone());
        let facade = FileStorageFacade::new(backend, metadata.checksum_type);
        let replica = Some(ReplicaManager::new(
            instance_root.join("replicas"),
            metadata.replica.n,
            metadata.replica.m,
            metadata.checksum_type,
        )?);

        let handle =
            Arc::new(FileStorageHandle { facade, replica, instance_root, busy: AtomicBool::new(false) });
        self.fs_map.lock()?.insert(spec.to_string(), handle.clone());
        info!("opened file storage {}", spec);
        Ok(handle)
    }

    /// Loads metadata for `instance_root`, falling back to `default` when
    /// none exists on disk yet, and populates the cache either way.
    fn load_or_init_metadata(
        &self,
        instance_root: &Path,
        default: impl FnOnce() -> FileStorageMetadata,
    ) -> Result<FileStorageMetadata, Error> {
        if let Some(metadata) = self.metadata_cache.lock()?.get(instance_root) {
            return Ok(metadata.clone());
        }
        let metadata = FileStorageMetadata::load(instance_root)?.unwrap_or_else(default);
        self.metadata_cache.lock()?.insert(instance_root.to_path_buf(), metadata.clone());
        Ok(metadata)
    }

    /// Reads metadata for `instance_root`, checking the cache first and
    /// erroring if neither the cache nor disk has an entry.
    fn require_metadata(&self, instance_root: &Path) -> Result<FileStorageMetadata, Error> {
        if let Some(metadata) = self.metadata_cache.lock()?.get(instance_root) {
            return Ok(metadata.clone());
        }
        let metadata = FileStorageMetadata::load(instance_root)?
            .ok_or_else(|| Error::IntegrityCorrupted(format!("no metadata at {}", instance_root.display())))?;
        self.metadata_cache.lock()?.insert(instance_root.to_path_buf(), metadata.clone());
        Ok(metadata)
    }

    /// Rewrites metadata to disk and updates the cache to match.
    fn save_metadata(&self, instance_root: &Path, metadata: &FileStorageMetadata) -> Result<(), Error> {
        metadata.save(instance_root)?;
        self.metadata_cache.lock()?.insert(instance_root.to_path_buf(), metadata.clone());
        Ok(())
    }

    /// Copies every file in `current/` to `backup/` and records the backup
    /// descriptor.
    pub fn backup_file_storage(&self, spec: &str) -> Result<(), Error> {
        let handle = self.get_file_storage(spec, false)?;
        with_busy(&handle, || {
            let mut metadata = self.require_metadata(&handle.instance_root)?;
            self.do_backup(&handle, &mut metadata)?;
            self.save_metadata(&handle.instance_root, &metadata)
        })
    }

    fn do_backup(&self, handle: &FileStorageHandle, metadata: &mut FileStorageMetadata) -> Result<(), Error> {
        let backend = FileStorageBackend::new(handle.instance_root.clone());
        for name in backend.list(Category::Current)? {
            let bytes = backend.read(&name, Category::Current)?;
            backend.write(&name, &bytes, Category::Backup)?;
        }
        metadata.backup = BackupDescriptor {
            exists: true,
            version: metadata.deployment_version.clone(),
            creation_time: now_epoch_secs(),
        };
        Ok(())
    }

    /// Empties `current/` and copies every `backup/` entry over it,
    /// transitioning through `Recovering`.
    pub fn restore_file_storage(&self, spec: &str) -> Result<(), Error> {
        let handle = self.get_file_storage(spec, false)?;
        with_busy(&handle, || {
            let mut metadata = self.require_metadata(&handle.instance_root)?;
            self.do_restore(&handle, &mut metadata)
        })
    }

    fn do_restore(&self, handle: &FileStorageHandle, metadata: &mut FileStorageMetadata) -> Result<(), Error> {
        if !metadata.backup.exists {
            return Err(Error::IllegalWriteAccess(format!(
                "{}: no backup exists to restore from",
                handle.instance_root.display()
            )));
        }
        metadata.set_state(StorageState::Recovering);
        self.save_metadata(&handle.instance_root, metadata)?;

        let backend = FileStorageBackend::new(handle.instance_root.clone());
        for name in backend.list(Category::Current)? {
            backend.delete(&name, Category::Current)?;
        }

        let backup_names = backend.list(Category::Backup)?;
        let mut restored = 0usize;
        for name in &backup_names {
            match backend.read(name, Category::Backup) {
                Ok(bytes) => {
                    backend.write(name, &bytes, Category::Current)?;
                    restored += 1;
                }
                Err(e) => warn!("restore: could not read backup copy of {}: {}", name, e),
            }
        }

        if restored == 0 && !backup_names.is_empty() {
            metadata.set_state(StorageState::Corrupted);
            let _ = self.save_metadata(&handle.instance_root, metadata);
            return Err(Error::PhysicalStorageFailure(format!(
                "{}: restore recovered 0 of {} backup files",
                handle.instance_root.display(),
                backup_names.len()
            )));
        }

        metadata.deployment_version = metadata.backup.version.clone();
        metadata.set_state(StorageState::Normal);
        self.save_metadata(&handle.instance_root, metadata)
    }

    /// Backs up current state and transitions to `Updating`. Copying the
    /// update payload into `update/` is an explicit extension point left
    /// to the caller; this call stops at backup + state change.
    pub fn perform_update(&self, spec: &str, _update_path: &Path) -> Result<(), Error> {
        let handle = self.get_file_storage(spec, false)?;
        with_busy(&handle, || {
            let mut metadata = self.require_metadata(&handle.instance_root)?;
            if metadata.state != StorageState::Normal {
                return Err(Error::ResourceBusy(format!(
                    "{} is not in Normal state (currently {:?})",
                    spec, metadata.state
                )));
            }
            self.do_backup(&handle, &mut metadata)?;
            metadata.set_state(StorageState::Updating);
            self.save_metadata(&handle.instance_root, &metadata)
        })
    }

    /// Restores from the pre-update backup and clears `update/`.
    pub fn rollback(&self, spec: &str) -> Result<(), Error> {
        let handle = self.get_file_storage(spec, false)?;
        with_busy(&handle, || {
            let mut metadata = self.require_metadata(&handle.instance_root)?;
            metadata.set_state(StorageState::RollingBack);
            self.save_metadata(&handle.instance_root, &metadata)?;

            self.do_restore(&handle, &mut metadata)?;

            let backend = FileStorageBackend::new(handle.instance_root.clone());
            for name in backend.list(Category::Update)? {
                backend.delete(&name, Category::Update)?;
            }
            metadata.set_state(StorageState::Normal);
            self.save_metadata(&handle.instance_root, &metadata)
        })
    }

    /// Byte-wise comparison of `new_deployment_version`/`new_contract_version`
    /// against the stored metadata. `true` if no metadata exists yet.
    pub fn needs_update(
        &self,
        spec: &str,
        new_deployment_version: &str,
        new_contract_version: &str,
    ) -> Result<bool, Error> {
        let config = self.ensure_initialized()?;
        let instance_root =
            self.path_manager.fs_instance_path(&config.central_storage_uri, spec)?;
        if let Some(metadata) = self.metadata_cache.lock()?.get(&instance_root) {
            return Ok(metadata.needs_update(new_deployment_version, new_contract_version));
        }
        match FileStorageMetadata::load(&instance_root)? {
            Some(metadata) => {
                let needs_update = metadata.needs_update(new_deployment_version, new_contract_version);
                self.metadata_cache.lock()?.insert(instance_root, metadata);
                Ok(needs_update)
            }
            None => Ok(true),
        }
    }

    /// Hook: scans replica status for every registered file when a replica
    /// manager is wired; otherwise logs and returns empty.
    pub fn check_replica_health(&self, spec: &str) -> Result<Vec<ReplicaStatus>, Error> {
        let handle = self.get_file_storage(spec, false)?;
        let Some(replica) = handle.replica_manager() else {
            warn!("check_replica_health: {} has no replica manager wired", spec);
            return Ok(Vec::new());
        };
        let mut statuses = Vec::new();
        for name in handle.facade().get_all_file_names()? {
            statuses.extend(replica.check_status(&name)?);
        }
        Ok(statuses)
    }

    /// Hook: repairs every registered file's replica set, returning the
    /// total number of replicas rewritten.
    pub fn repair_replicas(&self, spec: &str) -> Result<u32, Error> {
        let handle = self.get_file_storage(spec, false)?;
        let Some(replica) = handle.replica_manager() else {
            warn!("repair_replicas: {} has no replica manager wired", spec);
            return Ok(0);
        };
        let mut total = 0u32;
        for name in handle.facade().get_all_file_names()? {
            match replica.repair(&name) {
                Ok(n) => total += n,
                Err(e) => warn!("repair_replicas: skipping {}: {}", name, e),
            }
        }
        Ok(total)
    }
}

impl Default for PersistencyManager {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_name(kind: KvsBackendKind) -> &'static str {
    match kind {
        KvsBackendKind::File => "file",
        KvsBackendKind::Sqlite => "sqlite",
        KvsBackendKind::Property => "property",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumType;
    use crate::config::KvsConfig;
    use crate::value::{TypeTag, TypedValue};

    fn config(root: &Path) -> PersistencyConfig {
        PersistencyConfig {
            central_storage_uri: root.to_str().unwrap().to_string(),
            replica_count: 3,
            min_valid_replicas: 2,
            checksum_type: ChecksumType::Crc32,
            contract_version: "1.0.0".to_string(),
            deployment_version: "1.0.0".to_string(),
            redundancy_handling: String::new(),
            update_strategy: String::new(),
            deployment_uris: Vec::new(),
            kvs: KvsConfig::default(),
        }
    }

    #[test]
    fn open_before_init_is_not_initialized() {
        let manager = PersistencyManager::new();
        let err = manager.get_kvs_storage("app", true, None).unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[test]
    fn second_open_returns_cached_handle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        let a = manager.get_kvs_storage("app", true, None).unwrap();
        let b = manager.get_kvs_storage("app", true, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn open_without_create_on_missing_is_storage_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        let err = manager.get_kvs_storage("nope", false, None).unwrap_err();
        assert!(matches!(err, Error::StorageNotFound(_)));
    }

    #[test]
    fn kvs_set_get_round_trips_through_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        let handle = manager.get_kvs_storage("app", true, Some(KvsBackendKind::File)).unwrap();
        handle.backend().set_value("x", &TypedValue::Int32(7)).unwrap();
        assert_eq!(handle.backend().get_value("x", TypeTag::Int32).unwrap(), TypedValue::Int32(7));
    }

    #[test]
    fn backup_then_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        let handle = manager.get_file_storage("app", true).unwrap();
        handle.facade().write_file("a", b"1,2,3").unwrap();
        handle.facade().write_file("b", b"4,5,6").unwrap();

        manager.backup_file_storage("app").unwrap();

        handle.facade().write_file("a", b"9,9,9").unwrap();
        handle.facade().delete_file("b").unwrap();

        manager.restore_file_storage("app").unwrap();

        let backend = FileStorageBackend::new(handle.instance_root.clone());
        assert_eq!(backend.read("a", Category::Current).unwrap(), b"1,2,3");
        assert_eq!(backend.read("b", Category::Current).unwrap(), b"4,5,6");

        let metadata = FileStorageMetadata::load(&handle.instance_root).unwrap().unwrap();
        assert_eq!(metadata.state, StorageState::Normal);
    }

    #[test]
    fn restore_without_backup_is_illegal_write_access() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        manager.get_file_storage("app", true).unwrap();

        let err = manager.restore_file_storage("app").unwrap_err();
        assert!(matches!(err, Error::IllegalWriteAccess(_)));
    }

    #[test]
    fn perform_update_then_rollback_restores_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        let handle = manager.get_file_storage("app", true).unwrap();
        handle.facade().write_file("a", b"before-update").unwrap();

        manager.perform_update("app", Path::new("/dev/null")).unwrap();
        let metadata = FileStorageMetadata::load(&handle.instance_root).unwrap().unwrap();
        assert_eq!(metadata.state, StorageState::Updating);

        handle.facade().write_file("a", b"mid-update-mutation").unwrap();

        manager.rollback("app").unwrap();
        let backend = FileStorageBackend::new(handle.instance_root.clone());
        assert_eq!(backend.read("a", Category::Current).unwrap(), b"before-update");

        let metadata = FileStorageMetadata::load(&handle.instance_root).unwrap().unwrap();
        assert_eq!(metadata.state, StorageState::Normal);
    }

    #[test]
    fn perform_update_requires_normal_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        manager.get_file_storage("app", true).unwrap();

        manager.perform_update("app", Path::new("/dev/null")).unwrap();
        let err = manager.perform_update("app", Path::new("/dev/null")).unwrap_err();
        assert!(matches!(err, Error::ResourceBusy(_)));
    }

    #[test]
    fn needs_update_true_when_no_metadata_yet() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();

        assert!(manager.needs_update("never-opened", "2.0.0", "1.0.0").unwrap());
    }

    #[test]
    fn needs_update_false_when_versions_match() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        manager.get_file_storage("app", true).unwrap();

        assert!(!manager.needs_update("app", "1.0.0", "1.0.0").unwrap());
        assert!(manager.needs_update("app", "2.0.0", "1.0.0").unwrap());
    }

    #[test]
    fn busy_handle_rejects_concurrent_lifecycle_ops() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        let handle = manager.get_file_storage("app", true).unwrap();

        handle.busy.store(true, Ordering::SeqCst);
        let err = manager.get_file_storage("app", true).unwrap_err();
        assert!(matches!(err, Error::ResourceBusy(_)));
        handle.busy.store(false, Ordering::SeqCst);
    }

    #[test]
    fn check_replica_health_reports_missing_replicas_before_any_replica_write() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        let handle = manager.get_file_storage("app", true).unwrap();
        handle.facade().write_file("a", b"data").unwrap();

        // write_file only touches current/, not the replica set, so every
        // replica of "a" is reported missing until someone writes through
        // the replica manager directly.
        let statuses = manager.check_replica_health("app").unwrap();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.exists));
    }

    #[test]
    fn repair_replicas_without_any_replica_writes_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistencyManager::new();
        manager.init(config(dir.path())).unwrap();
        let handle = manager.get_file_storage("app", true).unwrap();
        handle.facade().write_file("a", b"data").unwrap();

        // No consensus exists yet, so repair logs and skips rather than failing.
        assert_eq!(manager.repair_replicas("app").unwrap(), 0);
    }
}
