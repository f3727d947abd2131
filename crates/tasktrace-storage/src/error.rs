use std::fmt;

/// Result type for tasktrace-storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the storage layer
#[derive(Debug)]
pub enum Error {
    /// No payload is stored under the requested id
    NotFound(String),

    /// Id cannot be used as a storage key (path separators, `..`, empty)
    InvalidId(String),

    /// IO operation failed
    Io(std::io::Error),
}

impl Error {
    /// Whether the caller can treat this as a missing image rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(id) => write!(f, "Screenshot not found in storage: {}", id),
            Error::InvalidId(id) => write!(f, "Invalid storage id: {:?}", id),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::NotFound(_) | Error::InvalidId(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
