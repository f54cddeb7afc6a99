//! `persistency-core` is a persistent key-value and file storage engine for
//! safety-critical, long-lived embedded/automotive workloads. Applications
//! store typed scalars/strings under string keys (KVS) and named byte blobs
//! (FileStorage) across process restarts, software updates, and partial
//! media failures.
//!
//! Three interchangeable KVS backends share one [`kvs::backend::KvsBackend`]
//! trait: a single-file structured-text backend ([`kvs::file_backend`]), an
//! embedded SQL database backend ([`kvs::sqlite_backend`]), and a
//! shared-memory backend with a pluggable persistent delegate
//! ([`kvs::shm_backend`]). A layered FileStorage
//! ([`file_storage::backend`], [`file_storage::facade`]) tracks versions,
//! backups, and initial/update categories, while an M-out-of-N
//! [`replica::ReplicaManager`] gives checksum-verified, consensus-read
//! replication for individual files. The [`manager::PersistencyManager`]
//! ties all of this into one instance registry with backup/restore/update/
//! rollback orchestration.
//!
//! ## Getting started
//!
//! ```rust
//! use persistency_core::config::{KvsConfig, PersistencyConfig};
//! use persistency_core::checksum::ChecksumType;
//! use persistency_core::manager::PersistencyManager;
//! use persistency_core::value::{TypeTag, TypedValue};
//!
//! fn run() -> Result<(), persistency_core::error::Error> {
//!     let dir = tempfile::tempdir().unwrap();
//!     let config = PersistencyConfig {
//!         central_storage_uri: dir.path().to_str().unwrap().to_string(),
//!         replica_count: 3,
//!         min_valid_replicas: 2,
//!         checksum_type: ChecksumType::Crc32,
//!         contract_version: "1.0.0".to_string(),
//!         deployment_version: "1.0.0".to_string(),
//!         redundancy_handling: String::new(),
//!         update_strategy: String::new(),
//!         deployment_uris: Vec::new(),
//!         kvs: KvsConfig::default(),
//!     };
//!
//!     let manager = PersistencyManager::new();
//!     manager.init(config)?;
//!
//!     let app = manager.get_kvs_storage("app_settings", true, None)?;
//!     app.backend().set_value("volume", &TypedValue::Int32(7))?;
//!     app.backend().sync_to_storage()?;
//!
//!     assert_eq!(app.backend().get_value("volume", TypeTag::Int32)?, TypedValue::Int32(7));
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod file_storage;
pub mod kvs;
pub mod manager;
pub mod metadata;
pub mod path_manager;
pub mod replica;
pub mod value;

