//! Error types for the relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the messaging provider gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// One or more of the required secrets is absent.
    #[error("Gateway not configured (missing: {})", .missing.join(", "))]
    NotConfigured { missing: Vec<String> },

    /// Network failure (`status` is `None`) or a non-success provider response.
    #[error("Upstream API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    UpstreamApi {
        status: Option<u16>,
        message: String,
        /// The provider's `error` object, when it sent one.
        details: Option<serde_json::Value>,
    },

    /// A provider message id that cannot be addressed as a single path segment.
    #[error("Invalid provider message id: {0:?}")]
    InvalidMessageId(String),
}

impl GatewayError {
    /// Build an upstream error with no HTTP status (transport failure).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::UpstreamApi {
            status: None,
            message: message.into(),
            details: None,
        }
    }
}

/// Client-side request errors, surfaced synchronously to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field(s): {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures replacing the auto-response rule table.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The table was valid but could not be persisted; it was not applied.
    #[error("Failed to persist rule table: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The event body could not be parsed as structured data at all.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}
