use thiserror::Error;

/// Crate-wide error type.
///
/// Variants map to the error kinds in the system's error-handling design: most are
/// non-fatal and absorbed by a long-lived loop, a few are fatal at startup only.
#[derive(Error, Debug)]
pub enum AppError {
    /// The root cancellation scope ended while an operation was in flight.
    #[error("cancelled")]
    Cancellation,

    /// Another Stream Manager (in this process or another) already holds the device lock.
    #[error("device already locked: {0}")]
    AlreadyLocked(String),

    /// The transcoder child exited with a non-zero status.
    #[error("transcoder exited with status {0}")]
    TranscoderExitNonZero(i32),

    /// A Stream Manager exhausted its restart budget.
    #[error("max restart attempts exceeded for {name} (last error: {last_error})")]
    MaxAttemptsExceeded { name: String, last_error: String },

    /// Configuration failed to parse or validate at startup (fatal).
    #[error("invalid configuration: {0}")]
    ConfigInvalidStartup(String),

    /// Configuration failed to parse or validate on reload (non-fatal).
    #[error("invalid configuration on reload: {0}")]
    ConfigInvalidReload(String),

    /// Device enumeration failed (non-fatal, next tick retries).
    #[error("enumeration failed: {0}")]
    EnumerateFailed(String),

    /// The media router could not be reached or returned an unexpected status.
    #[error("media router unreachable: {0}")]
    RemoteUnreachable(String),

    /// A single segment file could not be deleted during a retention pass.
    #[error("segment cleanup error for {path}: {source}")]
    SegmentCleanupError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The lock directory could not be created (fatal at startup).
    #[error("failed to create lock directory {path}: {source}")]
    LockDirCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The transcoder binary could not be resolved or is not executable (fatal at startup).
    #[error("transcoder binary not found or not executable: {0}")]
    TranscoderBinaryUnresolved(String),

    /// A service name was registered twice.
    #[error("duplicate service name: {0}")]
    DuplicateService(String),

    /// The registry's shutdown timeout elapsed before every service stopped.
    #[error("shutdown timeout exceeded")]
    ShutdownTimeoutExceeded,

    /// `run` was called on a registry that is already running.
    #[error("registry is already running")]
    AlreadyRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// True if this error represents an orderly cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancellation)
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
