//! Error taxonomy shared by every depot component.

use thiserror::Error;

/// Errors surfaced by normalization, formatting, storage and the registry.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// No readable resource could be derived from an upload input.
    #[error("passed file ({}) does not contain a valid resource: {reason}", filename.as_deref().unwrap_or("unknown"))]
    InvalidSource {
        filename: Option<String>,
        reason: String,
    },

    #[error("formatter \"{0}\" could not be found")]
    UnknownFormatter(String),

    #[error("adapter \"{0}\" could not be loaded")]
    UnknownAdapter(String),

    #[error("unsupported hashing algorithm \"{0}\"")]
    UnknownHashAlgorithm(String),

    /// The formatter needs context data that was missing or unusable.
    #[error("invalid formatter context: {0}")]
    InvalidContext(String),

    #[error("file entity schema violation: {0}")]
    SchemaViolation(String),

    #[error("failed to write {path}: {source}")]
    UploadFailed {
        path: String,
        #[source]
        source: Box<FilesystemError>,
    },

    #[error("no \"{0}\" filesystem configuration found")]
    ConfigNotFound(String),

    #[error("destination already exists: {0}")]
    DestinationExists(String),

    #[error("file not found: {0}")]
    NotFound(String),

    /// A before-hook stopped the operation without supplying a replacement.
    #[error("{0} was stopped by a listener")]
    Vetoed(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    /// A storage path that is empty or climbs out of the storage root.
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for depot operations.
pub type Result<T> = std::result::Result<T, FilesystemError>;

impl FilesystemError {
    pub(crate) fn invalid_source(filename: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            filename: filename.map(str::to_string),
            reason: reason.into(),
        }
    }
}
