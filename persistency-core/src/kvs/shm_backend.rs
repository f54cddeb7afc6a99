//! Shared-memory KVS backend: a cross-process map held in a named,
//! `memmap2`-backed segment, optionally coupled to a **delegate**
//! persistent backend for a durable tier.
//!
//! `memmap2` backs the segment with a `MAP_SHARED` file mapping, giving
//! cross-process visibility without a custom allocator for the map
//! itself.

use crate::error::Error;
use crate::kvs::backend::{BackendKind, KvsBackend};
use crate::value::{TypeTag, TypedValue};
use log::{info, warn};
use memmap2::MmapMut;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Length-prefix header size (u64, little-endian) at the start of the
/// segment, followed by a JSON object mapping key -> encoded value.
const HEADER_LEN: usize = 8;

struct State {
    mmap: MmapMut,
    map: HashMap<String, String>,
}

/// Couples an in-memory map, mirrored into a `memmap2` segment for
/// cross-process visibility, to an optional delegate backend for
/// durability across restarts.
pub struct ShmKvsBackend {
    segment_path: PathBuf,
    segment_size: u64,
    delegate: Option<Box<dyn KvsBackend>>,
    state: Mutex<State>,
}

/// Derives the segment file name: `shm_kvs_{pid}_{sanitised_prefix}_{hash}`,
/// scoped by process id to avoid cross-process collisions during tests.
fn segment_file_name(instance_id: &str) -> String {
    let sanitised: String = instance_id.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect();
    let hash = crate::checksum::crc32_hex(instance_id.as_bytes());
    format!("shm_kvs_{}_{}_{}", std::process::id(), sanitised, hash)
}

impl ShmKvsBackend {
    /// Opens (creating if absent) a segment of `segment_size` bytes under
    /// `{instance_root}/current/`, optionally loading from `delegate` if
    /// the segment is newly created.
    pub fn open(
        instance_root: impl Into<PathBuf>,
        instance_id: &str,
        segment_size: u64,
        delegate: Option<Box<dyn KvsBackend>>,
    ) -> Result<Self, Error> {
        let instance_root = instance_root.into();
        std::fs::create_dir_all(instance_root.join("current"))?;
        let segment_path = instance_root.join("current").join(segment_file_name(instance_id));

        let is_new = !segment_path.exists();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&segment_path)?;
        file.set_len(segment_size)?;

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| {
                Error::InitValueNotAvailable(format!("failed to map shared segment {}: {}", segment_path.display(), e))
            })?
        };

        let map = if is_new { HashMap::new() } else { Self::read_map(&mmap).unwrap_or_default() };

        let mut backend = ShmKvsBackend {
            segment_path,
            segment_size,
            delegate,
            state: Mutex::new(State { mmap, map }),
        };

        if is_new {
            backend.load_from_delegate()?;
        }

        info!("opened shared-memory kvs segment {}", backend.segment_path.display());
        Ok(backend)
    }

    fn load_from_delegate(&mut self) -> Result<(), Error> {
        let Some(delegate) = self.delegate.as_ref() else { return Ok(()) };
        if !delegate.available() {
            return Ok(());
        }
        let keys = delegate.get_all_keys()?;
        let mut state = self.state.lock()?;
        for key in keys {
            match delegate.get_any(&key) {
                Ok(value) => {
                    state.map.insert(key, Self::encode(&value));
                }
                Err(e) => warn!("skipping legacy/unreadable delegate key {}: {}", key, e),
            }
        }
        Self::write_map(&mut state.mmap, &state.map)?;
        Ok(())
    }

    fn encode(value: &TypedValue) -> String {
        format!("{}{}", value.tag().as_char(), value.raw_text())
    }

    fn decode(encoded: &str) -> Result<TypedValue, Error> {
        let mut chars = encoded.chars();
        let tag_char = chars.next().ok_or_else(|| Error::IntegrityCorrupted("empty encoded value".to_string()))?;
        let tag = TypeTag::from_char(tag_char)
            .ok_or_else(|| Error::IntegrityCorrupted(format!("unknown type tag '{}'", tag_char)))?;
        crate::value::parse_as(chars.as_str(), tag)
    }

    fn read_map(mmap: &MmapMut) -> Result<HashMap<String, String>, Error> {
        if mmap.len() < HEADER_LEN {
            return Ok(HashMap::new());
        }
        let len = u64::from_le_bytes(mmap[..HEADER_LEN].try_into().unwrap()) as usize;
        if len == 0 || HEADER_LEN + len > mmap.len() {
            return Ok(HashMap::new());
        }
        let bytes = &mmap[HEADER_LEN..HEADER_LEN + len];
        let map: HashMap<String, String> = serde_json::from_slice(bytes)?;
        Ok(map)
    }

    fn write_map(mmap: &mut MmapMut, map: &HashMap<String, String>) -> Result<(), Error> {
        let serialised = serde_json::to_vec(map)?;
        if HEADER_LEN + serialised.len() > mmap.len() {
            return Err(Error::OutOfMemorySpace(format!(
                "serialised map ({} bytes) exceeds segment capacity ({} bytes)",
                serialised.len(),
                mmap.len() - HEADER_LEN
            )));
        }
        (&mut mmap[..HEADER_LEN]).write_all(&(serialised.len() as u64).to_le_bytes())?;
        mmap[HEADER_LEN..HEADER_LEN + serialised.len()].copy_from_slice(&serialised);
        mmap.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for ShmKvsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShmKvsBackend({})", self.segment_path.display())
    }
}

impl KvsBackend for ShmKvsBackend {
    fn available(&self) -> bool {
        self.segment_path.exists()
    }

    fn get_all_keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.lock()?.map.keys().cloned().collect())
    }

    fn key_exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.state.lock()?.map.contains_key(key))
    }

    fn get_value(&self, key: &str, tag: TypeTag) -> Result<TypedValue, Error> {
        let value = self.get_any(key)?;
        if value.tag() as u8 != tag as u8 {
            return Err(Error::DataTypeMismatch(format!("{} is not {:?}", key, tag)));
        }
        Ok(value)
    }

    fn get_any(&self, key: &str) -> Result<TypedValue, Error> {
        let state = self.state.lock()?;
        let encoded = state.map.get(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        Self::decode(encoded)
    }

    fn set_value(&self, key: &str, value: &TypedValue) -> Result<(), Error> {
        let mut state = self.state.lock()?;
        state.map.insert(key.to_string(), Self::encode(value));
        let State { mmap, map } = &mut *state;
        Self::write_map(mmap, map)
    }

    /// Idempotent-success on a missing key, matching the original
    /// `CKvsPropertyBackend::RemoveKey` (erase-if-found, always success).
    fn remove_key(&self, key: &str) -> Result<(), Error> {
        let mut state = self.state.lock()?;
        state.map.remove(key);
        let State { mmap, map } = &mut *state;
        Self::write_map(mmap, map)
    }

    fn remove_all_keys(&self) -> Result<(), Error> {
        let mut state = self.state.lock()?;
        state.map.clear();
        let State { mmap, map } = &mut *state;
        Self::write_map(mmap, map)
    }

    /// A full push: clears the delegate, writes every segment entry, then
    /// calls the delegate's own sync. A `none` delegate makes this a
    /// no-op success.
    fn sync_to_storage(&self) -> Result<(), Error> {
        let Some(delegate) = self.delegate.as_ref() else { return Ok(()) };
        let state = self.state.lock()?;
        delegate.remove_all_keys()?;
        for (key, encoded) in &state.map {
            let value = Self::decode(encoded)?;
            delegate.set_value(key, &value)?;
        }
        delegate.sync_to_storage()
    }

    /// Clears the segment map and re-loads from the delegate.
    fn discard_pending_changes(&self) -> Result<(), Error> {
        let Some(delegate) = self.delegate.as_ref() else {
            let mut state = self.state.lock()?;
            state.map.clear();
            let State { mmap, map } = &mut *state;
            return Self::write_map(mmap, map);
        };
        delegate.discard_pending_changes()?;
        let keys = delegate.get_all_keys()?;
        let mut state = self.state.lock()?;
        state.map.clear();
        for key in keys {
            if let Ok(value) = delegate.get_any(&key) {
                state.map.insert(key, Self::encode(&value));
            }
        }
        let State { mmap, map } = &mut *state;
        Self::write_map(mmap, map)
    }

    fn recover_key(&self, key: &str) -> Result<(), Error> {
        match self.delegate.as_ref() {
            Some(delegate) => delegate.recover_key(key),
            None => Err(Error::Unsupported("no delegate configured for recovery".to_string())),
        }
    }

    fn reset_key(&self, key: &str) -> Result<(), Error> {
        match self.delegate.as_ref() {
            Some(delegate) => delegate.reset_key(key),
            None => Err(Error::Unsupported("no delegate configured for reset".to_string())),
        }
    }

    fn get_size(&self) -> Result<u64, Error> {
        Ok(self.segment_size)
    }

    fn get_key_count(&self) -> Result<u64, Error> {
        Ok(self.state.lock()?.map.len() as u64)
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::SharedMemory
    }

    fn supports_persistence(&self) -> bool {
        self.delegate.is_some()
    }
}
