//! Per-instance persistent record (`FileStorageMetadata`) and the
//! `StorageState` lifecycle enum the persistency manager drives: one small
//! structured-text document per instance at `.metadata/storage_info.json`.

use crate::checksum::ChecksumType;
use crate::config::PersistencyConfig;
use crate::error::Error;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of one storage instance. Initial: `Normal`. No
/// terminal state — every state may transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    Normal,
    Updating,
    RollingBack,
    Corrupted,
    Recovering,
}

impl Default for StorageState {
    fn default() -> Self {
        StorageState::Normal
    }
}

/// `(exists, version, creation_time)` backup descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub exists: bool,
    pub version: String,
    pub creation_time: u64,
}

impl Default for BackupDescriptor {
    fn default() -> Self {
        BackupDescriptor { exists: false, version: String::new(), creation_time: 0 }
    }
}

/// `(N, M)` replica configuration carried in the metadata record, independent
/// of any live [`crate::replica::ReplicaManager`] built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub n: u32,
    pub m: u32,
}

/// Reserved encryption key slots. The core defines no algorithm
/// (`Error::EncryptionFailed` is reserved for a future one); this only
/// carries opaque, unvalidated key identifiers so a future encrypted
/// backend has somewhere to read/write them without a metadata format
/// change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionSlots {
    pub slot_ids: Vec<String>,
}

/// Per-instance persistent record. Rewritten whole-file after any
/// lifecycle mutation; cached in-memory by the persistency manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStorageMetadata {
    pub contract_version: String,
    pub deployment_version: String,
    pub manifest_version: String,
    pub storage_uri: String,
    pub min_sustained_size: u64,
    pub max_allowed_size: u64,
    pub state: StorageState,
    pub replica: ReplicaConfig,
    pub checksum_type: ChecksumType,
    #[serde(default)]
    pub encryption: EncryptionSlots,
    pub created_at: u64,
    pub modified_at: u64,
    #[serde(default)]
    pub backup: BackupDescriptor,
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl FileStorageMetadata {
    /// Synthesises a fresh record from the resolved configuration on
    /// first instance creation: defaults from config, `state = Normal`,
    /// timestamps set to now.
    pub fn new_default(config: &PersistencyConfig) -> Self {
        let now = now_epoch_secs();
        FileStorageMetadata {
            contract_version: config.contract_version.clone(),
            deployment_version: config.deployment_version.clone(),
            manifest_version: String::new(),
            storage_uri: config.central_storage_uri.clone(),
            min_sustained_size: 0,
            max_allowed_size: u64::MAX,
            state: StorageState::Normal,
            replica: ReplicaConfig { n: config.replica_count, m: config.min_valid_replicas },
            checksum_type: config.checksum_type,
            encryption: EncryptionSlots::default(),
            created_at: now,
            modified_at: now,
            backup: BackupDescriptor::default(),
        }
    }

    fn touch(&mut self) {
        self.modified_at = now_epoch_secs();
    }

    pub fn set_state(&mut self, state: StorageState) {
        self.state = state;
        self.touch();
    }

    /// Byte-wise version comparison: the engine does not decide semantic
    /// version ordering, only inequality.
    pub fn needs_update(&self, new_deployment_version: &str, new_contract_version: &str) -> bool {
        self.deployment_version != new_deployment_version || self.contract_version != new_contract_version
    }

    /// Serialises to the small structured-text document at
    /// `{storage_path}/.metadata/storage_info.json`.
    pub fn save(&self, storage_path: &Path) -> Result<(), Error> {
        let dir = storage_path.join(".metadata");
        std::fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join("storage_info.json"), bytes)?;
        Ok(())
    }

    pub fn load(storage_path: &Path) -> Result<Option<FileStorageMetadata>, Error> {
        let path = storage_path.join(".metadata").join("storage_info.json");
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let metadata: FileStorageMetadata = serde_json::from_slice(&bytes)?;
        Ok(Some(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KvsConfig;

    fn config() -> PersistencyConfig {
        PersistencyConfig {
            central_storage_uri: "/tmp/persistency".to_string(),
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
    fn new_default_starts_normal() {
        let metadata = FileStorageMetadata::new_default(&config());
        assert_eq!(metadata.state, StorageState::Normal);
        assert_eq!(metadata.replica.n, 3);
        assert_eq!(metadata.replica.m, 2);
        assert!(!metadata.backup.exists);
    }

    #[test]
    fn needs_update_is_byte_wise() {
        let metadata = FileStorageMetadata::new_default(&config());
        assert!(!metadata.needs_update("1.0.0", "1.0.0"));
        assert!(metadata.needs_update("1.0.1", "1.0.0"));
        // "1.10.0" vs "1.2.0": byte-wise inequality only, no semantic ordering.
        assert!(metadata.needs_update("1.10.0", "1.0.0"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = FileStorageMetadata::new_default(&config());
        metadata.set_state(StorageState::Updating);
        metadata.save(dir.path()).unwrap();

        let loaded = FileStorageMetadata::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.state, StorageState::Updating);
        assert_eq!(loaded.contract_version, "1.0.0");
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileStorageMetadata::load(dir.path()).unwrap().is_none());
    }
}
