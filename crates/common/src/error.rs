use thiserror::Error;

/// Error taxonomy shared by the capture, render, and violation nodes.
///
/// Control-surface calls (`start`/`stop`/`status`) return these
/// synchronously; errors raised inside a running worker loop are caught
/// there and converted into a state transition or a skip, never
/// propagated out of the owning stream's worker.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stream '{0}' is already running")]
    AlreadyRunning(String),

    #[error("stream '{0}' is not running")]
    NotRunning(String),

    #[error("no configuration found for stream '{0}'")]
    ConfigNotFound(String),

    #[error("failed to initialize capture for '{0}': {1}")]
    CaptureInitFailed(String, String),

    #[error("external process '{0}' has exited")]
    ProcessDead(String),

    #[error("clip unavailable: {0}")]
    ClipUnavailable(String),

    #[error("failed to load rules: {0}")]
    RuleLoadError(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Errors that a running loop absorbs without changing pipeline
    /// state (logged only).
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, PipelineError::PublishFailed(_))
    }
}
