use thiserror::Error;

/// A single failed work item, keyed by its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: String,
    pub message: String,
}

impl ItemFailure {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// imgpack error types
#[derive(Error, Debug)]
pub enum PackError {
    /// Registry lookup failed while building a descriptor graph
    #[error("Registry fetch failed for {reference}: {message}")]
    RegistryFetch { reference: String, message: String },

    /// Registry returned a manifest format that cannot be packaged
    #[error("Unsupported manifest for {reference}: {hint}")]
    UnsupportedManifest { reference: String, hint: String },

    /// Archive is missing an entry or carries inconsistent content
    #[error("Archive corrupt: {0}")]
    ArchiveCorrupt(String),

    /// Writing or seeking the destination archive failed
    #[error("Archive write failed at {path}: {source}")]
    WriteIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more work queue items failed
    #[error("{}", format_failures(.failures))]
    AggregateItem { failures: Vec<ItemFailure> },

    /// Malformed image reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Malformed digest
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Queue error
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PackError {
    /// Wrap any error as a registry failure for `reference`.
    pub fn registry(reference: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PackError::RegistryFetch {
            reference: reference.into(),
            message: err.to_string(),
        }
    }

    /// Wrap an I/O error raised while writing `path`.
    pub fn write_io(path: impl Into<String>, source: std::io::Error) -> Self {
        PackError::WriteIo {
            path: path.into(),
            source,
        }
    }

    /// Keys of every failed item, empty for non-aggregate errors.
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            PackError::AggregateItem { failures } => {
                failures.iter().map(|f| f.key.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[ItemFailure]) -> String {
    let mut out = format!("{} item(s) failed:", failures.len());
    for failure in failures {
        out.push_str(&format!("\n- {}: {}", failure.key, failure.message));
    }
    out
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::SerializationError(err.to_string())
    }
}

/// Result type alias for imgpack operations
pub type Result<T> = std::result::Result<T, PackError>;
