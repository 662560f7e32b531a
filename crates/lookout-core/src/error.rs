use crate::types::ReviewStatus;

/// Errors that can occur across the Lookout platform.
///
/// The first six variants are the pipeline taxonomy: they are raised by the
/// individual stages and, once a run has started, end up recorded on the
/// review rather than returned to a caller. The remaining variants cover
/// storage, configuration files and the worker queue.
///
/// # Examples
///
/// ```
/// use lookout_core::LookoutError;
///
/// let err = LookoutError::Publish("GitHub API error 500".into());
/// assert!(err.to_string().contains("500"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum LookoutError {
    /// App credentials missing or installation token issuance failed.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Pull request metadata or file listing could not be retrieved.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Invalid or missing configuration, e.g. no model API key.
    #[error("configuration error: {0}")]
    Config(String),

    /// The model backend could not be reached or answered with an HTTP error.
    #[error("LLM transport error: {0}")]
    GenerationTransport(String),

    /// Posting the review to the hosting platform failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// Malformed or incomplete inbound webhook.
    #[error("validation error: {0}")]
    Validation(String),

    /// SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A review was asked to move against its lifecycle.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: ReviewStatus, to: ReviewStatus },

    /// The worker queue is saturated or shut down.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
