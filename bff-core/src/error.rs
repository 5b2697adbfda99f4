//! Error types for the moderation relay.
//!
//! Uses thiserror for ergonomic error definition. Each concern has its own
//! enum; [`Error`] wraps them for callers that do not care which one fired.

/// Main error type for the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Submission rejected before anything was stored
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Stream refused before contacting the upstream
    #[error("Stream refused: {0}")]
    Preflight(#[from] PreflightError),

    /// Completion provider failure
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Reasons a submission is rejected. Nothing is stored for any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message cannot be empty")]
    EmptyContent,

    #[error("Invalid Character Size: {len} exceeds the limit of {limit}")]
    ContentTooLong { len: usize, limit: usize },

    #[error("UserId cannot be empty")]
    EmptyUserId,

    #[error("Character limit must be greater than zero")]
    ZeroCharLimit,
}

/// Reasons a stream is refused before any upstream call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreflightError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message does not belong to the specified user")]
    NotOwner,

    #[error("Message contains forbidden keywords")]
    Flagged,
}

/// Failures talking to the completion provider.
///
/// The `Display` text is what downstream clients see in the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("completion API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("error reading stream: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid upstream configuration: {0}")]
    Config(String),
}

impl From<openai::Error> for UpstreamError {
    fn from(e: openai::Error) -> Self {
        match e {
            openai::Error::Api { status, message } => UpstreamError::Status {
                status,
                body: message,
            },
            openai::Error::Network(msg) => UpstreamError::Transport(msg),
            openai::Error::Timeout(msg) => UpstreamError::Timeout(msg),
            openai::Error::NoApiKey => UpstreamError::Config("API key not configured".to_string()),
            openai::Error::Config(msg) => UpstreamError::Config(msg),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
