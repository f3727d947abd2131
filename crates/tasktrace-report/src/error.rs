use std::fmt;
use std::path::PathBuf;

/// Result type for tasktrace-report operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while writing or merging reports
#[derive(Debug)]
pub enum Error {
    /// Dump model or document codec error
    Dump(tasktrace_dump::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// The write worker is no longer running
    QueueClosed,

    /// Merge target exists and overwriting was not requested
    AlreadyExists(PathBuf),

    /// A merge needs at least two reports
    NotEnoughReports(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Dump(err) => write!(f, "Dump error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::QueueClosed => write!(f, "Report write queue is closed"),
            Error::AlreadyExists(path) => {
                write!(f, "Report already exists: {}", path.display())
            }
            Error::NotEnoughReports(count) => write!(
                f,
                "Not enough reports to merge: need at least 2, got {}",
                count
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Dump(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Config(_)
            | Error::QueueClosed
            | Error::AlreadyExists(_)
            | Error::NotEnoughReports(_) => None,
        }
    }
}

impl From<tasktrace_dump::Error> for Error {
    fn from(err: tasktrace_dump::Error) -> Self {
        Error::Dump(err)
    }
}

impl From<tasktrace_storage::Error> for Error {
    fn from(err: tasktrace_storage::Error) -> Self {
        Error::Dump(tasktrace_dump::Error::Storage(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
