//! The resolved configuration record the core consumes. Parsing this out
//! of a configuration file is out of scope for the core; the `demos`
//! binary shows how an embedding application loads one with `confy` and
//! hands the parsed record in.

use crate::checksum::ChecksumType;
use crate::error::Error;
use serde_derive::{Deserialize, Serialize};

/// `kvs.backendType` selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvsBackendKind {
    File,
    Sqlite,
    Property,
}

/// `kvs.propertyBackendPersistence` selector — the shared-memory backend's
/// delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegateKind {
    File,
    Sqlite,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvsConfig {
    pub backend_type: KvsBackendKind,
    #[serde(default)]
    pub data_source_type: Option<String>,
    #[serde(default = "default_shm_size")]
    pub property_backend_shm_size: u64,
    #[serde(default = "default_delegate")]
    pub property_backend_persistence: DelegateKind,
    /// Whether the last attacher should unlink the shared-memory segment
    /// on graceful shutdown, as an explicit flag rather than an implicit
    /// default. Defaults to `false`: segments survive process exit.
    #[serde(default)]
    pub unlink_segment_on_close: bool,
}

fn default_shm_size() -> u64 {
    1 << 20
}

fn default_delegate() -> DelegateKind {
    DelegateKind::File
}

impl Default for KvsConfig {
    fn default() -> Self {
        KvsConfig {
            backend_type: KvsBackendKind::File,
            data_source_type: None,
            property_backend_shm_size: default_shm_size(),
            property_backend_persistence: default_delegate(),
            unlink_segment_on_close: false,
        }
    }
}

/// Resolved `persistency` configuration record. Treated as an immutable
/// snapshot once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistencyConfig {
    pub central_storage_uri: String,
    pub replica_count: u32,
    pub min_valid_replicas: u32,
    pub checksum_type: ChecksumType,
    pub contract_version: String,
    pub deployment_version: String,
    #[serde(default)]
    pub redundancy_handling: String,
    #[serde(default)]
    pub update_strategy: String,
    #[serde(default)]
    pub deployment_uris: Vec<String>,
    pub kvs: KvsConfig,
}

impl PersistencyConfig {
    /// Validates `1 ≤ M ≤ N`, `N ≥ 1`. Violations map to
    /// `InvalidArgument`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.replica_count == 0 {
            return Err(Error::InvalidArgument("replicaCount must be >= 1".to_string()));
        }
        if self.min_valid_replicas == 0 || self.min_valid_replicas > self.replica_count {
            return Err(Error::InvalidArgument(format!(
                "minValidReplicas ({}) must satisfy 1 <= M <= replicaCount ({})",
                self.min_valid_replicas, self.replica_count
            )));
        }
        Ok(())
    }
}
