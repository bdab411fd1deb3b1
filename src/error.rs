use std::path::{Path, PathBuf};

use thiserror::Error;

/// The primary error type for all operations in the `bulkseal` crate.
#[derive(Debug, Error)]
pub enum SealError {
    /// An I/O error occurred while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// A fixed-width header field (name, author, type) does not fit its capacity.
    #[error("field '{field}' is {len} bytes, capacity is {capacity}")]
    FieldTooLong { field: &'static str, len: usize, capacity: usize },

    /// Key material is wider than the entry header's key field.
    #[error("key is {len} bytes, key field holds {capacity}")]
    KeyTooLong { len: usize, capacity: usize },

    /// The destination container's base name does not fit the container header.
    #[error("destination name '{name}' exceeds {capacity} bytes")]
    DestNameTooLong { name: String, capacity: usize },

    /// A size does not fit the 4-byte big-endian length field.
    #[error("size {size} exceeds the 4-byte length field")]
    SizeOverflow { size: u64 },

    #[error("{algorithm} key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { algorithm: &'static str, expected: usize, actual: usize },

    /// Inverse padding bytes were inconsistent on decrypt.
    #[error("corrupt padding in decrypted chunk")]
    CorruptPadding,

    /// A transform primitive failed for a reason other than padding.
    #[error("transform error: {0}")]
    Transform(String),

    #[error("header truncated: need {needed} bytes, {available} available")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("not a container: {0}")]
    NotAContainer(String),

    #[error("entry '{name}' declares {declared} payload bytes, only {available} remain")]
    TruncatedEntry { name: String, declared: usize, available: usize },

    /// The recovered content length disagrees with the entry's OriginSize.
    #[error("entry '{name}' restored {actual} bytes, header says {expected}")]
    SizeMismatch { name: String, expected: usize, actual: usize },

    /// A file's entry came out empty after transform.
    #[error("empty payload after transforming '{}'", path.display())]
    EmptyPayload { path: PathBuf },

    #[error("entry '{name}' not found in container")]
    EntryNotFound { name: String },

    /// Entry names are plain base names; anything that could escape the output
    /// directory is refused.
    #[error("unsafe entry name '{name}'")]
    UnsafeEntryName { name: String },

    #[error("no input files")]
    EmptyInput,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("a worker thread panicked")]
    WorkerPanicked,

    #[error("could not spawn worker thread: {0}")]
    Spawn(std::io::Error),

    /// The first failure of a single source file, with the path that failed.
    #[error("failed on '{}': {source}", path.display())]
    Entry {
        path: PathBuf,
        #[source]
        source: Box<SealError>,
    },

    /// An error during serialization or deserialization of the configuration.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl SealError {
    /// Attach the offending path to an I/O error.
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> SealError {
        let path = path.as_ref().to_path_buf();
        move |source| SealError::Io { source, path }
    }

    /// Wrap an error with the source file it belongs to. Already-wrapped
    /// errors and cancellation pass through unchanged.
    pub fn for_entry(self, path: impl AsRef<Path>) -> SealError {
        match self {
            e @ (SealError::Entry { .. } | SealError::Cancelled | SealError::WorkerPanicked) => e,
            e => SealError::Entry { path: path.as_ref().to_path_buf(), source: Box::new(e) },
        }
    }

    /// Strip per-entry context, returning the underlying cause.
    pub fn root(&self) -> &SealError {
        match self {
            SealError::Entry { source, .. } => source.root(),
            e => e,
        }
    }
}

impl From<cbc::cipher::block_padding::UnpadError> for SealError {
    fn from(_: cbc::cipher::block_padding::UnpadError) -> Self {
        SealError::CorruptPadding
    }
}

impl From<rsa::Error> for SealError {
    fn from(err: rsa::Error) -> Self {
        SealError::Transform(format!("rsa: {err}"))
    }
}

impl From<base64::DecodeError> for SealError {
    fn from(err: base64::DecodeError) -> Self {
        SealError::Transform(format!("base64: {err}"))
    }
}

/// Pack and unpack share one taxonomy.
pub type PackError = SealError;
pub type UnpackError = SealError;

/// Alias for result that always uses SealError
pub type Result<T> = std::result::Result<T, SealError>;
