pub type Result<T> = std::result::Result<T, Error>;

/// Errors of the storage and engine layer.
///
/// Variants carry owned strings so a construction failure can be cloned to
/// every caller waiting on the same single-flight attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid URI specified: {0}")]
    InvalidUri(String),
    #[error("unsupported scheme type `{0}`")]
    UnsupportedScheme(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("persist of `{0}` was cancelled")]
    Cancelled(String),
    #[error("failed to open reader for index `{index}`: {reason}")]
    ReaderCreateFailed { index: String, reason: String },
    #[error("failed to open writer for index `{index}`: {reason}")]
    WriterCreateFailed { index: String, reason: String },
    #[error("batch failed: {0}")]
    BatchFailed(String),
    #[error("lock error: {0}")]
    Lock(String),
}

impl Error {
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}
