//! Single-file structured-text KVS backend: an in-memory map serialised to
//! `current/kvs_data.json`, committed through a four-phase atomic sync
//! (stage, validate, backup, atomic rename).

use crate::error::Error;
use crate::kvs::backend::{BackendKind, KvsBackend};
use crate::value::{TypeTag, TypedValue};
use fs4::FileExt;
use log::{debug, info};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const DATA_FILE_NAME: &str = "kvs_data.json";

#[derive(Debug, Clone)]
struct Entry {
    tag: TypeTag,
    raw: String,
}

struct State {
    entries: HashMap<String, Entry>,
    dirty: bool,
}

/// Single-file JSON-backed KVS. Holds an exclusive advisory lock on
/// `current/kvs_data.json` for the lifetime of the handle.
pub struct FileKvsBackend {
    instance_root: PathBuf,
    state: RwLock<State>,
    _lock_file: Option<File>,
}

impl FileKvsBackend {
    fn current_path(&self) -> PathBuf {
        self.instance_root.join("current").join(DATA_FILE_NAME)
    }

    fn update_path(&self) -> PathBuf {
        self.instance_root.join("update").join(DATA_FILE_NAME)
    }

    fn redundancy_backup_path(&self) -> PathBuf {
        self.instance_root.join("redundancy").join(format!("{}.bak", DATA_FILE_NAME))
    }

    /// Opens (creating if absent) the backend rooted at `instance_root`,
    /// which must already contain the four KVS category subdirectories.
    pub fn open(instance_root: impl Into<PathBuf>) -> Result<Self, Error> {
        let instance_root = instance_root.into();
        for category in ["current", "update", "redundancy", "recovery"] {
            std::fs::create_dir_all(instance_root.join(category))?;
        }

        let current_path = instance_root.join("current").join(DATA_FILE_NAME);
        let lock_file = if current_path.exists() {
            let f = File::open(&current_path)?;
            f.try_lock_exclusive().map_err(|_| {
                Error::ResourceBusy(format!("{} is locked by another handle", current_path.display()))
            })?;
            Some(f)
        } else {
            None
        };

        let entries = if current_path.exists() {
            Self::load_from(&current_path)?
        } else {
            HashMap::new()
        };

        Ok(FileKvsBackend {
            instance_root,
            state: RwLock::new(State { entries, dirty: false }),
            _lock_file: lock_file,
        })
    }

    fn load_from(path: &Path) -> Result<HashMap<String, Entry>, Error> {
        let bytes = std::fs::read(path)?;
        let json: JsonValue = serde_json::from_slice(&bytes)?;
        let object = json.as_object().ok_or_else(|| Error::IntegrityCorrupted(format!("{} is not a JSON object", path.display())))?;

        let mut entries = HashMap::with_capacity(object.len());
        for (key, value) in object {
            entries.insert(key.clone(), Self::decode_entry(value)?);
        }
        Ok(entries)
    }

    /// Decodes one entry, tolerating the legacy bare-primitive form (spec
    /// §4.5).
    fn decode_entry(value: &JsonValue) -> Result<Entry, Error> {
        if let Some(obj) = value.as_object() {
            let type_char = obj
                .get("type")
                .and_then(JsonValue::as_str)
                .and_then(|s| s.chars().next())
                .ok_or_else(|| Error::IntegrityCorrupted("entry missing type tag".to_string()))?;
            let tag = TypeTag::from_char(type_char)
                .ok_or_else(|| Error::IntegrityCorrupted(format!("unknown type tag '{}'", type_char)))?;
            let raw = obj
                .get("value")
                .map(json_value_to_raw)
                .ok_or_else(|| Error::IntegrityCorrupted("entry missing value".to_string()))?;
            return Ok(Entry { tag, raw });
        }

        match value {
            JsonValue::String(s) => Ok(Entry { tag: TypeTag::String, raw: s.clone() }),
            JsonValue::Bool(b) => Ok(Entry { tag: TypeTag::Bool, raw: b.to_string() }),
            JsonValue::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Ok(Entry { tag: TypeTag::Int32, raw: n.to_string() })
                } else {
                    Ok(Entry { tag: TypeTag::Float64, raw: n.to_string() })
                }
            }
            _ => Err(Error::IntegrityCorrupted("unsupported legacy value shape".to_string())),
        }
    }

    fn encode_entries(entries: &HashMap<String, Entry>) -> JsonValue {
        let mut object = Map::with_capacity(entries.len());
        for (key, entry) in entries {
            let mut record = Map::with_capacity(2);
            record.insert("type".to_string(), JsonValue::String(entry.tag.as_char().to_string()));
            record.insert("value".to_string(), JsonValue::String(entry.raw.clone()));
            object.insert(key.clone(), JsonValue::Object(record));
        }
        JsonValue::Object(object)
    }
}

fn json_value_to_raw(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for FileKvsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileKvsBackend({})", self.instance_root.display())
    }
}

impl KvsBackend for FileKvsBackend {
    fn available(&self) -> bool {
        self.instance_root.is_dir()
    }

    fn get_all_keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read()?.entries.keys().cloned().collect())
    }

    fn key_exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.state.read()?.entries.contains_key(key))
    }

    fn get_value(&self, key: &str, tag: TypeTag) -> Result<TypedValue, Error> {
        let state = self.state.read()?;
        let entry = state.entries.get(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        if entry.tag as u8 != tag as u8 {
            return Err(Error::DataTypeMismatch(format!(
                "{} is stored as {:?}, requested as {:?}",
                key, entry.tag, tag
            )));
        }
        crate::value::parse_as(&entry.raw, tag)
    }

    fn get_any(&self, key: &str) -> Result<TypedValue, Error> {
        let state = self.state.read()?;
        let entry = state.entries.get(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        crate::value::parse_as(&entry.raw, entry.tag)
    }

    fn set_value(&self, key: &str, value: &TypedValue) -> Result<(), Error> {
        let mut state = self.state.write()?;
        state.entries.insert(key.to_string(), Entry { tag: value.tag(), raw: value.raw_text() });
        state.dirty = true;
        Ok(())
    }

    /// Idempotent-success on a missing key, matching the original
    /// `CKvsFileBackend::RemoveKey` (erase-if-present, no existence check).
    fn remove_key(&self, key: &str) -> Result<(), Error> {
        let mut state = self.state.write()?;
        state.entries.remove(key);
        state.dirty = true;
        Ok(())
    }

    fn remove_all_keys(&self) -> Result<(), Error> {
        let mut state = self.state.write()?;
        state.entries.clear();
        state.dirty = true;
        Ok(())
    }

    fn sync_to_storage(&self) -> Result<(), Error> {
        let mut state = self.state.write()?;
        if !state.dirty {
            return Ok(());
        }

        let update_path = self.update_path();
        let current_path = self.current_path();
        let backup_path = self.redundancy_backup_path();

        // Stage.
        let json = Self::encode_entries(&state.entries);
        let serialised = serde_json::to_vec_pretty(&json)?;
        std::fs::create_dir_all(update_path.parent().unwrap())?;
        std::fs::write(&update_path, &serialised)?;
        debug!("staged {} bytes to {}", serialised.len(), update_path.display());

        // Validate.
        let validate = (|| -> Result<(), Error> {
            let bytes = std::fs::read(&update_path)?;
            let _: JsonValue = serde_json::from_slice(&bytes)?;
            Ok(())
        })();
        if let Err(e) = validate {
            let _ = std::fs::remove_file(&update_path);
            return Err(Error::IntegrityCorrupted(format!("staged kvs data failed validation: {}", e)));
        }

        // Backup.
        if current_path.exists() {
            std::fs::create_dir_all(backup_path.parent().unwrap())?;
            if let Err(e) = std::fs::copy(&current_path, &backup_path) {
                let _ = std::fs::remove_file(&update_path);
                return Err(e.into());
            }
        }

        // Atomic swap.
        if let Err(e) = std::fs::rename(&update_path, &current_path) {
            let _ = std::fs::remove_file(&update_path);
            return Err(e.into());
        }

        state.dirty = false;
        info!("synced kvs data to {}", current_path.display());
        Ok(())
    }

    fn discard_pending_changes(&self) -> Result<(), Error> {
        let current_path = self.current_path();
        let entries = if current_path.exists() { Self::load_from(&current_path)? } else { HashMap::new() };
        let mut state = self.state.write()?;
        state.entries = entries;
        state.dirty = false;
        Ok(())
    }

    fn recover_key(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Unsupported("single-file backend does not support per-key recovery".to_string()))
    }

    fn reset_key(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Unsupported("single-file backend does not support per-key reset".to_string()))
    }

    fn get_size(&self) -> Result<u64, Error> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(0);
        }
        Ok(std::fs::metadata(&path)?.len())
    }

    fn get_key_count(&self) -> Result<u64, Error> {
        Ok(self.state.read()?.entries.len() as u64)
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::File
    }

    fn supports_persistence(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::backend::test_support::test_kvs_backend;

    fn setup() -> FileKvsBackend {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileKvsBackend::open(dir.path()).unwrap();
        std::mem::forget(dir);
        backend
    }

    test_kvs_backend!(setup());

    #[test]
    fn legacy_bare_primitives_decode() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("current")).unwrap();
        std::fs::write(
            dir.path().join("current").join(DATA_FILE_NAME),
            r#"{"a": "hello", "b": true, "c": 7}"#,
        )
        .unwrap();

        let backend = FileKvsBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get_value("a", TypeTag::String).unwrap(), TypedValue::String("hello".into()));
        assert_eq!(backend.get_value("b", TypeTag::Bool).unwrap(), TypedValue::Bool(true));
        assert_eq!(backend.get_value("c", TypeTag::Int32).unwrap(), TypedValue::Int32(7));
    }

    #[test]
    fn sync_creates_backup_of_previous_current() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileKvsBackend::open(dir.path()).unwrap();
        backend.set_value("a", &TypedValue::Int32(1)).unwrap();
        backend.sync_to_storage().unwrap();

        backend.set_value("a", &TypedValue::Int32(2)).unwrap();
        backend.sync_to_storage().unwrap();

        assert!(dir.path().join("redundancy").join(format!("{}.bak", DATA_FILE_NAME)).exists());
    }

    #[test]
    fn type_mismatch_on_get_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileKvsBackend::open(dir.path()).unwrap();
        backend.set_value("a", &TypedValue::Int32(1)).unwrap();
        assert!(matches!(backend.get_value("a", TypeTag::String), Err(Error::DataTypeMismatch(_))));
    }

    #[test]
    fn per_key_recovery_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileKvsBackend::open(dir.path()).unwrap();
        assert!(matches!(backend.recover_key("a"), Err(Error::Unsupported(_))));
        assert!(matches!(backend.reset_key("a"), Err(Error::Unsupported(_))));
    }
}
