use thiserror::Error;

/// Errors surfaced by the tracker library.
///
/// Data-quality problems (a bad GPS fix, too few points for an area) are not
/// errors; they degrade the estimate and are reported through events.
#[derive(Error, Debug)]
pub enum PdrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Session worker stopped")]
    WorkerStopped,
}

/// Result type for tracker operations
pub type PdrResult<T> = Result<T, PdrError>;
