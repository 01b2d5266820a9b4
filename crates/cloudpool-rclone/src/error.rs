use thiserror::Error;

#[derive(Debug, Error)]
pub enum RcloneError {
    #[error("Unsupported account type: {0}")]
    UnsupportedProvider(String),

    #[error("Failed to configure remote {remote}: {output}")]
    Configuration { remote: String, output: String },

    #[error("Failed to connect to remote {remote}: {output}")]
    Connectivity { remote: String, output: String },

    #[error("Quota unavailable for remote {remote}: {reason}")]
    QuotaUnavailable { remote: String, reason: String },

    #[error("Failed to compose union {union}: {reason}")]
    Composition { union: String, reason: String },

    #[error("Already mounted: {0}")]
    AlreadyMounted(String),

    #[error("Mount failed at {mountpoint}: {output}")]
    Mount { mountpoint: String, output: String },

    #[error("Mount at {mountpoint} not ready after {waited_ms} ms")]
    MountTimeout { mountpoint: String, waited_ms: u64 },

    #[error("Unmount failed at {mountpoint}: {output}")]
    Unmount { mountpoint: String, output: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RcloneError>;

impl RcloneError {
    /// True for failures caused by the target already being in the requested
    /// state rather than by the tool itself.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RcloneError::AlreadyMounted(_))
    }

    /// True for errors raised before any external invocation happened.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, RcloneError::UnsupportedProvider(_))
    }
}
