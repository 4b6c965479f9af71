/// Domain-specific error types for trove
///
/// Telemetry and parsing paths deliberately never propagate these to the
/// caller — a search must always return a well-formed response. Only the
/// primary catalog query is allowed to fail a request.

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Not found: {what} {id}")]
    NotFound { what: &'static str, id: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for DiscoveryError {
    fn from(e: sqlx::Error) -> Self {
        DiscoveryError::Storage(e.to_string())
    }
}

impl DiscoveryError {
    /// Helper to create validation errors with field names
    pub fn validation(field: &str, message: &str) -> Self {
        DiscoveryError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}
