//! Error types for the remote schedule source.

use thiserror::Error;

/// Result type alias for remote source operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors raised while talking to the schedule API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP client or transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the schedule API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteError> for campusplan_core::Error {
    fn from(err: RemoteError) -> Self {
        campusplan_core::Error::remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_expose_their_status() {
        let err = RemoteError::api(503, "maintenance window");
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn conversion_lands_in_the_remote_variant() {
        let err: campusplan_core::Error = RemoteError::api(500, "boom").into();
        assert!(matches!(err, campusplan_core::Error::Remote(_)));
    }
}
