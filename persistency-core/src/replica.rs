//! M-out-of-N replica manager: checksum-verified writes to `N` copies and
//! consensus-based reads requiring `M` agreeing copies, with self-repair.

use crate::checksum::{checksum, ChecksumType};
use crate::error::Error;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Per-replica observation produced by a status scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaStatus {
    pub index: u32,
    pub path: PathBuf,
    pub exists: bool,
    pub valid: bool,
    pub checksum: String,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

/// A named set of `N` physical copies of one logical file, co-located under
/// `base_storage_path`.
pub struct ReplicaManager {
    base_storage_path: PathBuf,
    n: u32,
    m: u32,
    checksum_type: ChecksumType,
}

impl ReplicaManager {
    /// `M` out of range is coerced: `M > N` clamps to `N`; `M == 0` becomes
    /// `1` (both with a warning), matching the original constructor.
    pub fn new(
        base_storage_path: impl Into<PathBuf>,
        n: u32,
        m: u32,
        checksum_type: ChecksumType,
    ) -> Result<Self, Error> {
        let base_storage_path = base_storage_path.into();
        let mut m = m;
        if m > n {
            warn!("min_valid_replicas ({}) > replica_count ({}), clamping to match", m, n);
            m = n;
        }
        if m == 0 {
            warn!("min_valid_replicas is 0, coercing to 1");
            m = 1;
        }
        std::fs::create_dir_all(&base_storage_path)?;
        info!(
            "replica manager initialized: N={}, M={}, checksum={}, path={}",
            n,
            m,
            checksum_type,
            base_storage_path.display()
        );
        Ok(ReplicaManager { base_storage_path, n, m, checksum_type })
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    fn replica_path(&self, logical_name: &str, index: u32) -> PathBuf {
        self.base_storage_path.join(format!("{}.replica_{}", logical_name, index))
    }

    /// Extracts the logical name from a `{name}.replica_{i}` file name, or
    /// `None` if it doesn't match that pattern.
    pub fn extract_logical_name(file_name: &str) -> Option<&str> {
        let (prefix, suffix) = file_name.rsplit_once(".replica_")?;
        suffix.parse::<u32>().ok()?;
        Some(prefix)
    }

    fn checksum_of_file(&self, path: &Path) -> Result<String, Error> {
        let bytes = std::fs::read(path)?;
        Ok(checksum(self.checksum_type, &bytes))
    }

    /// Writes `bytes` to all `N` replicas, verifying each write by reading it
    /// back and checking the checksum. Rejects empty input. Returns
    /// `OutOfStorageSpace` if fewer than `M` replicas succeeded.
    pub fn write(&self, logical_name: &str, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument("replica write requires non-empty data".to_string()));
        }

        let expected = checksum(self.checksum_type, bytes);
        let mut success_count = 0u32;
        let mut last_error = None;

        for i in 0..self.n {
            let path = self.replica_path(logical_name, i);
            match self.write_one_replica(&path, bytes, &expected) {
                Ok(()) => success_count += 1,
                Err(e) => {
                    error!("failed to write replica {} for {}: {}", i, logical_name, e);
                    last_error = Some(e);
                }
            }
        }

        if success_count < self.m {
            error!(
                "only {} of {} required replicas written for {}",
                success_count, self.m, logical_name
            );
            let _ = last_error;
            return Err(Error::OutOfStorageSpace(format!(
                "wrote {}/{} replicas, need at least {}",
                success_count, self.n, self.m
            )));
        }

        info!("wrote {}/{} replicas for {}", success_count, self.n, logical_name);
        Ok(())
    }

    fn write_one_replica(&self, path: &Path, bytes: &[u8], expected: &str) -> Result<(), Error> {
        std::fs::write(path, bytes)?;
        let actual = self.checksum_of_file(path)?;
        if actual != expected {
            let _ = std::fs::remove_file(path);
            return Err(Error::ChecksumMismatch(format!("{} != {}", actual, expected)));
        }
        Ok(())
    }

    /// Scans all `N` replicas without forcing a read of the payload beyond
    /// what's needed to checksum it.
    pub fn check_status(&self, logical_name: &str) -> Result<Vec<ReplicaStatus>, Error> {
        let mut statuses = Vec::with_capacity(self.n as usize);
        for i in 0..self.n {
            let path = self.replica_path(logical_name, i);
            let exists = path.exists();
            if !exists {
                statuses.push(ReplicaStatus {
                    index: i,
                    path,
                    exists: false,
                    valid: false,
                    checksum: String::new(),
                    size: 0,
                    mtime: None,
                });
                continue;
            }
            let meta = std::fs::metadata(&path)?;
            match self.checksum_of_file(&path) {
                Ok(sum) => statuses.push(ReplicaStatus {
                    index: i,
                    path,
                    exists: true,
                    valid: true,
                    checksum: sum,
                    size: meta.len(),
                    mtime: meta.modified().ok(),
                }),
                Err(e) => {
                    warn!("replica {} checksum failed: {}", i, e);
                    statuses.push(ReplicaStatus {
                        index: i,
                        path,
                        exists: true,
                        valid: false,
                        checksum: String::new(),
                        size: meta.len(),
                        mtime: meta.modified().ok(),
                    });
                }
            }
        }
        Ok(statuses)
    }

    /// Finds a checksum value with at least `M` agreeing replicas.
    pub fn find_consensus(&self, logical_name: &str, replicas: &[ReplicaStatus]) -> Result<String, Error> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for r in replicas {
            if r.valid && r.exists {
                *counts.entry(r.checksum.as_str()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .find(|(_, count)| *count >= self.m)
            .map(|(sum, _)| sum.to_string())
            .ok_or_else(|| {
                Error::IntegrityCorrupted(format!(
                    "no checksum reached consensus of {} for {}",
                    self.m, logical_name
                ))
            })
    }

    /// Reads the consensus payload: at least `M` replicas must share a
    /// checksum. Returns the bytes of the first replica matching consensus.
    pub fn read(&self, logical_name: &str) -> Result<Vec<u8>, Error> {
        debug!("reading replicas for {}", logical_name);
        let replicas = self.check_status(logical_name)?;
        let consensus = self.find_consensus(logical_name, &replicas)?;

        let valid_count = replicas.iter().filter(|r| r.valid && r.checksum == consensus).count();
        if (valid_count as u32) < self.n {
            warn!(
                "only {}/{} replicas agree with consensus for {}, repair recommended",
                valid_count, self.n, logical_name
            );
        }

        for r in &replicas {
            if r.valid && r.checksum == consensus {
                let bytes = std::fs::read(&r.path)?;
                let actual = checksum(self.checksum_type, &bytes);
                if actual == consensus {
                    info!("read {} from replica {}", logical_name, r.index);
                    return Ok(bytes);
                }
            }
        }

        Err(Error::FileNotFound(format!("no replica of {} produced the consensus payload", logical_name)))
    }

    /// Rewrites every replica whose checksum differs from consensus (or is
    /// missing). Returns the number of replicas rewritten.
    pub fn repair(&self, logical_name: &str) -> Result<u32, Error> {
        info!("repairing replicas for {}", logical_name);
        let replicas = self.check_status(logical_name)?;
        let consensus = self.find_consensus(logical_name, &replicas)?;

        let mut valid_data = None;
        for r in &replicas {
            if r.valid && r.checksum == consensus {
                valid_data = Some(std::fs::read(&r.path)?);
                break;
            }
        }
        let valid_data = valid_data.ok_or_else(|| Error::FileNotFound(format!("no valid replica for {}", logical_name)))?;

        let mut repaired = 0u32;
        for r in &replicas {
            if !r.valid || r.checksum != consensus {
                match self.write_one_replica(&r.path, &valid_data, &consensus) {
                    Ok(()) => {
                        repaired += 1;
                        info!("repaired replica {}", r.index);
                    }
                    Err(e) => error!("failed to repair replica {}: {}", r.index, e),
                }
            }
        }
        info!("repaired {} replicas for {}", repaired, logical_name);
        Ok(repaired)
    }

    /// Removes all `N` physical files. Succeeds even if some were already
    /// missing.
    pub fn delete(&self, logical_name: &str) -> Result<(), Error> {
        debug!("deleting all replicas for {}", logical_name);
        let mut deleted = 0u32;
        for i in 0..self.n {
            let path = self.replica_path(logical_name, i);
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("deleted {}/{} replicas for {}", deleted, self.n, logical_name);
        Ok(())
    }

    /// Validates and updates `(N, M)`. Does not migrate existing files.
    pub fn reconfigure(&mut self, n: u32, m: u32) -> Result<(), Error> {
        if m > n {
            return Err(Error::InvalidArgument("min_valid_replicas cannot exceed replica_count".to_string()));
        }
        if m == 0 {
            return Err(Error::InvalidArgument("min_valid_replicas must be at least 1".to_string()));
        }
        info!("reconfiguring replica manager: N={}->{}, M={}->{}", self.n, n, self.m, m);
        self.n = n;
        self.m = m;
        Ok(())
    }

    /// Lists the distinct logical names managed under `base_storage_path`, by
    /// scanning for `.replica_N` suffixes.
    pub fn list_files(&self) -> Result<Vec<String>, Error> {
        let mut names = std::collections::BTreeSet::new();
        let entries = match std::fs::read_dir(&self.base_storage_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(file_name) = entry.file_name().to_str() {
                if let Some(logical_name) = Self::extract_logical_name(file_name) {
                    names.insert(logical_name.to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(n: u32, m: u32) -> (tempfile::TempDir, ReplicaManager) {
        let dir = tempfile::tempdir().unwrap();
        let rm = ReplicaManager::new(dir.path(), n, m, ChecksumType::Crc32).unwrap();
        (dir, rm)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, rm) = manager(3, 2);
        rm.write("consensus_test.txt", b"Consensus test data").unwrap();
        let read_back = rm.read("consensus_test.txt").unwrap();
        assert_eq!(read_back, b"Consensus test data");
    }

    #[test]
    fn read_survives_one_corruption() {
        let (dir, rm) = manager(3, 2);
        rm.write("consensus_test.txt", b"Consensus test data").unwrap();

        std::fs::write(dir.path().join("consensus_test.txt.replica_1"), b"CORRUPTED DATA").unwrap();

        let read_back = rm.read("consensus_test.txt").unwrap();
        assert_eq!(read_back, b"Consensus test data");

        let statuses = rm.check_status("consensus_test.txt").unwrap();
        assert!(!statuses[1].valid || statuses[1].checksum != statuses[0].checksum);
        assert!(statuses[0].valid);
        assert!(statuses[2].valid);
    }

    #[test]
    fn read_fails_with_two_corruptions() {
        let (dir, rm) = manager(3, 2);
        rm.write("consensus_test.txt", b"Consensus test data").unwrap();

        std::fs::write(dir.path().join("consensus_test.txt.replica_0"), b"BOGUS A").unwrap();
        std::fs::write(dir.path().join("consensus_test.txt.replica_1"), b"BOGUS B").unwrap();

        let err = rm.read("consensus_test.txt").unwrap_err();
        assert!(matches!(err, Error::IntegrityCorrupted(_)));
    }

    #[test]
    fn repair_rewrites_divergent_replicas() {
        let (dir, rm) = manager(3, 2);
        rm.write("f.bin", b"hello").unwrap();
        std::fs::write(dir.path().join("f.bin.replica_2"), b"stale").unwrap();

        let repaired = rm.repair("f.bin").unwrap();
        assert_eq!(repaired, 1);

        let statuses = rm.check_status("f.bin").unwrap();
        assert!(statuses.iter().all(|s| s.valid));
        let checksums: std::collections::HashSet<_> = statuses.iter().map(|s| s.checksum.clone()).collect();
        assert_eq!(checksums.len(), 1);
    }

    #[test]
    fn delete_removes_all_replicas_even_if_partial() {
        let (dir, rm) = manager(3, 2);
        rm.write("f.bin", b"hello").unwrap();
        std::fs::remove_file(dir.path().join("f.bin.replica_0")).unwrap();

        rm.delete("f.bin").unwrap();
        for i in 0..3 {
            assert!(!dir.path().join(format!("f.bin.replica_{}", i)).exists());
        }
    }

    #[test]
    fn empty_write_rejected() {
        let (_dir, rm) = manager(3, 2);
        let err = rm.write("f.bin", b"").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn construction_clamps_out_of_range_m() {
        let dir = tempfile::tempdir().unwrap();
        let rm = ReplicaManager::new(dir.path(), 3, 10, ChecksumType::Crc32).unwrap();
        assert_eq!(rm.m(), 3);

        let dir2 = tempfile::tempdir().unwrap();
        let rm2 = ReplicaManager::new(dir2.path(), 3, 0, ChecksumType::Crc32).unwrap();
        assert_eq!(rm2.m(), 1);
    }

    #[test]
    fn reconfigure_validates_and_does_not_migrate() {
        let (dir, mut rm) = manager(3, 2);
        rm.write("f.bin", b"hello").unwrap();

        assert!(rm.reconfigure(5, 0).is_err());
        assert!(rm.reconfigure(2, 3).is_err());

        rm.reconfigure(5, 3).unwrap();
        assert_eq!(rm.n(), 5);
        assert_eq!(rm.m(), 3);

        // Old replica names still have only the original physical count.
        for i in 0..3 {
            assert!(dir.path().join(format!("f.bin.replica_{}", i)).exists());
        }
        for i in 3..5 {
            assert!(!dir.path().join(format!("f.bin.replica_{}", i)).exists());
        }
    }

    #[test]
    fn extract_logical_name_parses_replica_suffix() {
        assert_eq!(ReplicaManager::extract_logical_name("settings.json.replica_0"), Some("settings.json"));
        assert_eq!(ReplicaManager::extract_logical_name("settings.json.replica_12"), Some("settings.json"));
        assert_eq!(ReplicaManager::extract_logical_name("settings.json"), None);
        assert_eq!(ReplicaManager::extract_logical_name("settings.json.replica_abc"), None);
    }

    #[test]
    fn list_files_returns_distinct_logical_names() {
        let (_dir, rm) = manager(3, 2);
        rm.write("a.bin", b"one").unwrap();
        rm.write("b.bin", b"two").unwrap();

        let mut names = rm.list_files().unwrap();
        names.sort();
        assert_eq!(names, vec!["a.bin".to_string(), "b.bin".to_string()]);
    }
}
