//! Common KVS operations, implemented by the single-file, embedded-DB, and
//! shared-memory backends and dispatched dynamically through `Box<dyn
//! KvsBackend>`.

use crate::error::Error;
use crate::value::{TypeTag, TypedValue};
use std::fmt;

/// Identifies which concrete backend a handle is, for diagnostics and for
/// the persistency manager's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Sqlite,
    SharedMemory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::File => write!(f, "file"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::SharedMemory => write!(f, "shared-memory"),
        }
    }
}

/// A KVS backend: an in-process map of `String` keys to [`TypedValue`]s with
/// explicit sync/discard semantics. Implementors own their own interior
/// mutability (readers share, writers are exclusive at the backend's
/// discretion) so all methods take `&self`.
pub trait KvsBackend: fmt::Display + Send + Sync {
    fn available(&self) -> bool;

    fn get_all_keys(&self) -> Result<Vec<String>, Error>;

    fn key_exists(&self, key: &str) -> Result<bool, Error>;

    fn get_value(&self, key: &str, tag: TypeTag) -> Result<TypedValue, Error>;

    /// Type-blind get: returns the value with whatever tag it was stored
    /// under. Used by the shared-memory backend to load a delegate's
    /// entries on open without pre-knowing each key's tag.
    fn get_any(&self, key: &str) -> Result<TypedValue, Error>;

    fn set_value(&self, key: &str, value: &TypedValue) -> Result<(), Error>;

    fn remove_key(&self, key: &str) -> Result<(), Error>;

    fn remove_all_keys(&self) -> Result<(), Error>;

    /// Commits any buffered changes to durable storage.
    fn sync_to_storage(&self) -> Result<(), Error>;

    /// Reloads from the last-synced durable state, discarding in-memory
    /// changes made since.
    fn discard_pending_changes(&self) -> Result<(), Error>;

    /// Un-soft-deletes `key` if the backend supports soft delete; otherwise
    /// `Unsupported`.
    fn recover_key(&self, key: &str) -> Result<(), Error>;

    /// Hard-deletes a soft-deleted key if the backend supports soft delete;
    /// otherwise `Unsupported`.
    fn reset_key(&self, key: &str) -> Result<(), Error>;

    fn get_size(&self) -> Result<u64, Error>;

    fn get_key_count(&self) -> Result<u64, Error>;

    fn backend_type(&self) -> BackendKind;

    /// Whether this handle actually persists (a `none`-delegate
    /// shared-memory backend does not).
    fn supports_persistence(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Runs the universal per-backend invariants against any
    /// [`KvsBackend`] constructed by `$setup`.
    macro_rules! test_kvs_backend {
        ($setup:expr) => {
            #[test]
            fn missing_key_errors() {
                let backend = $setup;
                assert!(matches!(backend.get_value("missing", TypeTag::Int32), Err(Error::KeyNotFound(_))));
            }

            #[test]
            fn set_then_get_round_trips() {
                let backend = $setup;
                backend.set_value("a", &TypedValue::Int32(42)).unwrap();
                assert_eq!(backend.get_value("a", TypeTag::Int32).unwrap(), TypedValue::Int32(42));
                assert!(backend.key_exists("a").unwrap());
            }

            #[test]
            fn overwrite_replaces_type_and_value() {
                let backend = $setup;
                backend.set_value("a", &TypedValue::Int32(1)).unwrap();
                backend.set_value("a", &TypedValue::String("now a string".into())).unwrap();
                assert_eq!(
                    backend.get_value("a", TypeTag::String).unwrap(),
                    TypedValue::String("now a string".into())
                );
            }

            #[test]
            fn remove_key_drops_entry() {
                let backend = $setup;
                backend.set_value("a", &TypedValue::Bool(true)).unwrap();
                backend.remove_key("a").unwrap();
                assert!(!backend.key_exists("a").unwrap());
            }

            #[test]
            fn remove_key_on_missing_key_is_idempotent_success() {
                let backend = $setup;
                backend.remove_key("never-set").unwrap();
            }

            #[test]
            fn remove_all_clears_every_key() {
                let backend = $setup;
                backend.set_value("a", &TypedValue::Int8(1)).unwrap();
                backend.set_value("b", &TypedValue::Int8(2)).unwrap();
                backend.remove_all_keys().unwrap();
                assert_eq!(backend.get_all_keys().unwrap().len(), 0);
            }

            #[test]
            fn sync_then_discard_reloads_last_synced_state() {
                let backend = $setup;
                backend.set_value("a", &TypedValue::Int32(1)).unwrap();
                backend.sync_to_storage().unwrap();
                backend.set_value("a", &TypedValue::Int32(2)).unwrap();
                backend.discard_pending_changes().unwrap();
                assert_eq!(backend.get_value("a", TypeTag::Int32).unwrap(), TypedValue::Int32(1));
            }
        };
    }

    pub(crate) use test_kvs_backend;
}
