//! Pure per-category file CRUD: whole-buffer read/write, no registry, no
//! open-file tracking — that lives one layer up in
//! [`crate::file_storage::facade`].

use crate::error::Error;
use std::fmt;
use std::path::PathBuf;

/// One of the four on-disk buckets a logical file name can live in. The same
/// name may exist in more than one category at once; only `Current` is ever
/// served to readers by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Current,
    Backup,
    Initial,
    Update,
}

impl Category {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Current => "current",
            Category::Backup => "backup",
            Category::Initial => "initial",
            Category::Update => "update",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Identifies a stored file's location: which instance root, which category,
/// and the logical name within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUri {
    pub base: PathBuf,
    pub category: Category,
    pub name: String,
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.base.display(), self.category, self.name)
    }
}

/// Whole-buffer CRUD over one instance's four category directories, rooted
/// at `instance_root` (as derived by the path manager).
#[derive(Debug, Clone)]
pub struct FileStorageBackend {
    instance_root: PathBuf,
}

impl FileStorageBackend {
    pub fn new(instance_root: impl Into<PathBuf>) -> Self {
        FileStorageBackend { instance_root: instance_root.into() }
    }

    fn category_dir(&self, category: Category) -> PathBuf {
        self.instance_root.join(category.dir_name())
    }

    fn file_path(&self, name: &str, category: Category) -> PathBuf {
        self.category_dir(category).join(name)
    }

    pub fn read(&self, name: &str, category: Category) -> Result<Vec<u8>, Error> {
        let path = self.file_path(name, category);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(format!("{} not found in {}", name, category))
            } else {
                e.into()
            }
        })
    }

    /// Creates parent directories as needed.
    pub fn write(&self, name: &str, bytes: &[u8], category: Category) -> Result<(), Error> {
        let dir = self.category_dir(category);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), bytes)?;
        Ok(())
    }

    pub fn delete(&self, name: &str, category: Category) -> Result<(), Error> {
        let path = self.file_path(name, category);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(format!("{} not found in {}", name, category)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, category: Category) -> Result<Vec<String>, Error> {
        let dir = self.category_dir(category);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn exists(&self, name: &str, category: Category) -> bool {
        self.file_path(name, category).is_file()
    }

    pub fn size(&self, name: &str, category: Category) -> Result<u64, Error> {
        let path = self.file_path(name, category);
        let meta = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(format!("{} not found in {}", name, category))
            } else {
                e.into()
            }
        })?;
        Ok(meta.len())
    }

    pub fn copy(&self, name: &str, from: Category, to: Category) -> Result<(), Error> {
        let from_path = self.file_path(name, from);
        let to_dir = self.category_dir(to);
        std::fs::create_dir_all(&to_dir)?;
        std::fs::copy(&from_path, to_dir.join(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(format!("{} not found in {}", name, from))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    /// Atomic within one filesystem: copies then removes the source, relying
    /// on `rename` when source and destination share a filesystem.
    pub fn r#move(&self, name: &str, from: Category, to: Category) -> Result<(), Error> {
        let from_path = self.file_path(name, from);
        let to_dir = self.category_dir(to);
        std::fs::create_dir_all(&to_dir)?;
        std::fs::rename(&from_path, to_dir.join(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(format!("{} not found in {}", name, from))
            } else {
                e.into()
            }
        })
    }

    pub fn uri(&self, name: &str, category: Category) -> FileUri {
        FileUri { base: self.instance_root.clone(), category, name: name.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, FileStorageBackend) {
        let dir = tempfile::tempdir().unwrap();
        (dir, FileStorageBackend::new(dir.path()))
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, b) = backend();
        b.write("a.txt", b"hello", Category::Current).unwrap();
        assert_eq!(b.read("a.txt", Category::Current).unwrap(), b"hello");
    }

    #[test]
    fn read_missing_is_file_not_found() {
        let (_dir, b) = backend();
        let err = b.read("missing.txt", Category::Current).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn categories_are_independent() {
        let (_dir, b) = backend();
        b.write("a.txt", b"current-data", Category::Current).unwrap();
        assert!(!b.exists("a.txt", Category::Backup));
        assert!(b.exists("a.txt", Category::Current));
    }

    #[test]
    fn list_is_sorted_and_empty_for_missing_dir() {
        let (_dir, b) = backend();
        assert_eq!(b.list(Category::Backup).unwrap(), Vec::<String>::new());
        b.write("b.txt", b"1", Category::Current).unwrap();
        b.write("a.txt", b"2", Category::Current).unwrap();
        assert_eq!(b.list(Category::Current).unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn copy_preserves_source_move_does_not() {
        let (_dir, b) = backend();
        b.write("a.txt", b"data", Category::Current).unwrap();

        b.copy("a.txt", Category::Current, Category::Backup).unwrap();
        assert!(b.exists("a.txt", Category::Current));
        assert!(b.exists("a.txt", Category::Backup));

        b.r#move("a.txt", Category::Backup, Category::Initial).unwrap();
        assert!(!b.exists("a.txt", Category::Backup));
        assert!(b.exists("a.txt", Category::Initial));
    }

    #[test]
    fn size_and_uri() {
        let (_dir, b) = backend();
        b.write("a.txt", b"12345", Category::Current).unwrap();
        assert_eq!(b.size("a.txt", Category::Current).unwrap(), 5);

        let uri = b.uri("a.txt", Category::Current);
        assert_eq!(uri.category, Category::Current);
        assert_eq!(uri.name, "a.txt");
    }
}
