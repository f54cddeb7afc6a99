//! Closed error taxonomy for the persistency engine.
//!
//! Every fallible public operation returns [`PerResult<T>`]. Kinds are a
//! closed set (no catch-all `Other` variant) so that callers can match
//! exhaustively on failure modes.

use std::fmt;

/// One of the closed set of storage error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    StorageNotFound(String),
    KeyNotFound(String),
    IllegalWriteAccess(String),
    PhysicalStorageFailure(String),
    IntegrityCorrupted(String),
    ValidationFailed(String),
    /// Reserved: the core defines no encryption algorithm.
    EncryptionFailed(String),
    DataTypeMismatch(String),
    InitValueNotAvailable(String),
    ResourceBusy(String),
    OutOfMemorySpace(String),
    OutOfStorageSpace(String),
    FileNotFound(String),
    NotInitialized(String),
    InvalidPosition(String),
    IsEof(String),
    InvalidOpenMode(String),
    InvalidSize(String),
    PermissionDenied(String),
    Unsupported(String),
    WrongDataType(String),
    WrongDataSize(String),
    InvalidKey(String),
    InvalidArgument(String),
    ChecksumMismatch(String),
}

impl Error {
    /// The stable kind name, independent of the attached message.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::StorageNotFound(_) => "StorageNotFound",
            Error::KeyNotFound(_) => "KeyNotFound",
            Error::IllegalWriteAccess(_) => "IllegalWriteAccess",
            Error::PhysicalStorageFailure(_) => "PhysicalStorageFailure",
            Error::IntegrityCorrupted(_) => "IntegrityCorrupted",
            Error::ValidationFailed(_) => "ValidationFailed",
            Error::EncryptionFailed(_) => "EncryptionFailed",
            Error::DataTypeMismatch(_) => "DataTypeMismatch",
            Error::InitValueNotAvailable(_) => "InitValueNotAvailable",
            Error::ResourceBusy(_) => "ResourceBusy",
            Error::OutOfMemorySpace(_) => "OutOfMemorySpace",
            Error::OutOfStorageSpace(_) => "OutOfStorageSpace",
            Error::FileNotFound(_) => "FileNotFound",
            Error::NotInitialized(_) => "NotInitialized",
            Error::InvalidPosition(_) => "InvalidPosition",
            Error::IsEof(_) => "IsEof",
            Error::InvalidOpenMode(_) => "InvalidOpenMode",
            Error::InvalidSize(_) => "InvalidSize",
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::Unsupported(_) => "Unsupported",
            Error::WrongDataType(_) => "WrongDataType",
            Error::WrongDataSize(_) => "WrongDataSize",
            Error::InvalidKey(_) => "InvalidKey",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::ChecksumMismatch(_) => "ChecksumMismatch",
        }
    }

    /// `true` for errors that set the owning storage's state to `Corrupted`
    /// when they surface from a metadata-visible operation.
    pub fn is_fatal_for_storage(&self) -> bool {
        matches!(
            self,
            Error::PhysicalStorageFailure(_) | Error::IntegrityCorrupted(_) | Error::ChecksumMismatch(_)
        )
    }

    /// The stable numeric error code, for logging/diagnostics parity with
    /// the original error domain's code table. Never serialised across a
    /// wire boundary (that stays out of scope).
    pub fn code(&self) -> i32 {
        match self {
            Error::StorageNotFound(_) => 1,
            Error::KeyNotFound(_) => 2,
            Error::IllegalWriteAccess(_) => 3,
            Error::PhysicalStorageFailure(_) => 4,
            Error::IntegrityCorrupted(_) => 5,
            Error::ValidationFailed(_) => 6,
            Error::EncryptionFailed(_) => 7,
            Error::DataTypeMismatch(_) => 8,
            Error::InitValueNotAvailable(_) => 9,
            Error::ResourceBusy(_) => 10,
            Error::OutOfMemorySpace(_) => 11,
            Error::OutOfStorageSpace(_) => 12,
            Error::FileNotFound(_) => 13,
            Error::NotInitialized(_) => 14,
            Error::InvalidPosition(_) => 15,
            Error::IsEof(_) => 16,
            Error::InvalidOpenMode(_) => 17,
            Error::InvalidSize(_) => 18,
            Error::PermissionDenied(_) => 19,
            Error::Unsupported(_) => 20,
            Error::WrongDataType(_) => 21,
            Error::WrongDataSize(_) => 22,
            Error::InvalidKey(_) => 23,
            Error::InvalidArgument(_) => 24,
            Error::ChecksumMismatch(_) => 25,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::StorageNotFound(m) => m,
            Error::KeyNotFound(m) => m,
            Error::IllegalWriteAccess(m) => m,
            Error::PhysicalStorageFailure(m) => m,
            Error::IntegrityCorrupted(m) => m,
            Error::ValidationFailed(m) => m,
            Error::EncryptionFailed(m) => m,
            Error::DataTypeMismatch(m) => m,
            Error::InitValueNotAvailable(m) => m,
            Error::ResourceBusy(m) => m,
            Error::OutOfMemorySpace(m) => m,
            Error::OutOfStorageSpace(m) => m,
            Error::FileNotFound(m) => m,
            Error::NotInitialized(m) => m,
            Error::InvalidPosition(m) => m,
            Error::IsEof(m) => m,
            Error::InvalidOpenMode(m) => m,
            Error::InvalidSize(m) => m,
            Error::PermissionDenied(m) => m,
            Error::Unsupported(m) => m,
            Error::WrongDataType(m) => m,
            Error::WrongDataSize(m) => m,
            Error::InvalidKey(m) => m,
            Error::InvalidArgument(m) => m,
            Error::ChecksumMismatch(m) => m,
        };
        write!(f, "{}: {}", self.kind_name(), msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(err.to_string()),
            std::io::ErrorKind::UnexpectedEof => Error::IsEof(err.to_string()),
            std::io::ErrorKind::WouldBlock => Error::ResourceBusy(err.to_string()),
            _ => Error::PhysicalStorageFailure(err.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::PhysicalStorageFailure(format!("lock poisoned: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IntegrityCorrupted(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::PhysicalStorageFailure(err.to_string())
    }
}

/// Result alias used across the crate.
pub type PerResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::KeyNotFound("missing key \"x\"".to_string());
        assert_eq!(err.to_string(), "KeyNotFound: missing key \"x\"");
    }

    #[test]
    fn fatal_kinds_are_exact() {
        assert!(Error::ChecksumMismatch(String::new()).is_fatal_for_storage());
        assert!(Error::IntegrityCorrupted(String::new()).is_fatal_for_storage());
        assert!(Error::PhysicalStorageFailure(String::new()).is_fatal_for_storage());
        assert!(!Error::KeyNotFound(String::new()).is_fatal_for_storage());
    }

    #[test]
    fn io_not_found_maps_to_file_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert_eq!(err.kind_name(), "FileNotFound");
    }

    #[test]
    fn numeric_codes_match_the_error_domain_table() {
        assert_eq!(Error::StorageNotFound(String::new()).code(), 1);
        assert_eq!(Error::ChecksumMismatch(String::new()).code(), 25);
    }
}
