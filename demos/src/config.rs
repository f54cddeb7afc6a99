//! `confy`-loaded demo configuration: an all-`Option<T>`-fields struct
//! with a hand-written `Default`. Maps onto a
//! [`persistency_core::config::PersistencyConfig`] at startup; actual
//! configuration-file parsing stays a demo concern, never the core's.

use persistency_core::checksum::ChecksumType;
use persistency_core::config::{KvsBackendKind, KvsConfig, PersistencyConfig};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct DemoConfig {
    pub central_storage_uri: Option<String>,
    pub replica_count: Option<u32>,
    pub min_valid_replicas: Option<u32>,
    pub checksum_type: Option<String>,
    pub contract_version: Option<String>,
    pub deployment_version: Option<String>,
    pub kvs_backend: Option<String>,
    pub log_level: Option<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            central_storage_uri: Some("./persistency-demo-data".to_string()),
            replica_count: Some(3),
            min_valid_replicas: Some(2),
            checksum_type: Some("CRC32".to_string()),
            contract_version: Some("1.0.0".to_string()),
            deployment_version: Some("1.0.0".to_string()),
            kvs_backend: Some("file".to_string()),
            log_level: Some("info".to_string()),
        }
    }
}

impl DemoConfig {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn to_persistency_config(&self) -> anyhow::Result<PersistencyConfig> {
        let checksum_type: ChecksumType =
            self.checksum_type.as_deref().unwrap_or("CRC32").parse().map_err(|e| anyhow::anyhow!("{}", e))?;
        let backend_type = match self.kvs_backend.as_deref().unwrap_or("file") {
            "file" => KvsBackendKind::File,
            "sqlite" => KvsBackendKind::Sqlite,
            "property" => KvsBackendKind::Property,
            other => anyhow::bail!("unknown kvs backend '{}'", other),
        };
        Ok(PersistencyConfig {
            central_storage_uri: self
                .central_storage_uri
                .clone()
                .unwrap_or_else(|| "./persistency-demo-data".to_string()),
            replica_count: self.replica_count.unwrap_or(3),
            min_valid_replicas: self.min_valid_replicas.unwrap_or(2),
            checksum_type,
            contract_version: self.contract_version.clone().unwrap_or_else(|| "1.0.0".to_string()),
            deployment_version: self.deployment_version.clone().unwrap_or_else(|| "1.0.0".to_string()),
            redundancy_handling: String::new(),
            update_strategy: String::new(),
            deployment_uris: Vec::new(),
            kvs: KvsConfig { backend_type, ..KvsConfig::default() },
        })
    }
}
