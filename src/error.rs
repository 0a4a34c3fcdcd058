//! Error types for model-relay

use thiserror::Error;

/// Result type alias for model-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while querying a model backend
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller or programmer error (bad arguments, colliding parameters).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("Rate limit exceeded for {provider}: {message}")]
    RateLimited { provider: String, message: String },

    #[error("{provider} API error (HTTP {status}): {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    /// The client-credentials exchange failed. Never retried.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error(
        "Error calculating cost for model {model}: {reason}. You can ignore this issue with \
         cost_tracking: 'ignore_errors' in the model config or globally with \
         RELAY_COST_TRACKING=ignore_errors."
    )]
    CostTracking { model: String, reason: String },

    #[error(
        "No cost information available from {provider} for model {model}. Cost tracking is \
         required but the API response did not provide it."
    )]
    MissingCost { provider: String, model: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry policy may re-attempt the operation that produced this error.
    ///
    /// Rate limits, transport failures, generic provider errors and
    /// undecodable bodies are transient. Everything else (cancellation,
    /// authentication, bad arguments, cost failures) is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. }
                | Error::Provider { .. }
                | Error::Http(_)
                | Error::InvalidResponse { .. }
        )
    }

    /// Whether the provider rejected the credentials of the call.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
