//! Error types for the update client.

/// Top-level error type for checking, downloading and applying updates.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Bad construction input (null callback, empty URL, stale update info).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The release feed could not be retrieved from the source.
    #[error("release feed unavailable: {0}")]
    FeedUnavailable(String),

    /// The release feed or a manifest could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Another update operation holds the update lock.
    #[error("another update is already in progress: {0}")]
    LockContention(String),

    /// A package could not be transferred or failed verification.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The updater process could not be launched or the package is unusable.
    #[error("apply failed: {0}")]
    ApplyFailed(String),

    /// The application layout or manifest could not be located.
    #[error("application is not installed: {0}")]
    NotInstalled(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Process-wide state was already configured.
    #[error("already initialized: {0}")]
    AlreadyInitialized(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Returns `true` for failures the caller can retry later
    /// (transport, contention, transient download problems).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FeedUnavailable(_)
                | Self::LockContention(_)
                | Self::DownloadFailed(_)
                | Self::Cancelled
        )
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<semver::Error> for UpdateError {
    fn from(e: semver::Error) -> Self {
        Self::Parse(format!("invalid version: {e}"))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
