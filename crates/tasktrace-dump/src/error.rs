use std::fmt;

/// Result type for tasktrace-dump operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while building, persisting or loading dumps
#[derive(Debug)]
pub enum Error {
    /// Storage provider error (missing id, backend IO)
    Storage(tasktrace_storage::Error),

    /// A persisted screenshot could not be read back from its recorded location
    CannotRecover {
        id: String,
        location: String,
        reason: String,
    },

    /// No usable dump block in a document, or the block is not valid dump JSON
    MalformedDocument(String),

    /// The same screenshot was marked persisted twice
    DuplicatePersistAttempt(String),

    /// Screenshot payload is not decodable image data
    InvalidImageData(String),

    /// JSON (de)serialization failed
    Json(serde_json::Error),

    /// IO operation failed
    Io(std::io::Error),
}

impl Error {
    /// Non-retryable conditions that indicate lost or unusable data
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CannotRecover { .. } | Error::MalformedDocument(_)
        )
    }

    /// Screenshot id absent from the provider; callers may render it as a missing image
    pub fn is_storage_not_found(&self) -> bool {
        matches!(self, Error::Storage(err) if err.is_not_found())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Storage(err) => write!(f, "Storage error: {}", err),
            Error::CannotRecover {
                id,
                location,
                reason,
            } => write!(
                f,
                "Cannot recover screenshot {} from {}: {}",
                id, location, reason
            ),
            Error::MalformedDocument(msg) => write!(f, "Malformed document: {}", msg),
            Error::DuplicatePersistAttempt(id) => {
                write!(f, "Screenshot {} is already persisted", id)
            }
            Error::InvalidImageData(msg) => write!(f, "Invalid image data: {}", msg),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::CannotRecover { .. }
            | Error::MalformedDocument(_)
            | Error::DuplicatePersistAttempt(_)
            | Error::InvalidImageData(_) => None,
        }
    }
}

impl From<tasktrace_storage::Error> for Error {
    fn from(err: tasktrace_storage::Error) -> Self {
        Error::Storage(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
