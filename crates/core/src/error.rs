use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("source {source_tag} failed: {error}")]
    Scanner { source_tag: String, error: ScanError },

    #[error("consolidation for scope target {0} is already running")]
    AlreadyRunning(String),

    #[error("consolidation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Failure of a single source scanner.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query failed: {0}")]
    Query(String),

    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture session {0} is not active")]
    SessionClosed(String),

    #[error("invalid captured url: {0}")]
    InvalidUrl(String),
}
