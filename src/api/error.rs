use serde::{Deserialize, Serialize};

pub const NETWORK_ERROR_MESSAGE: &str = "Network error occurred. Please check your connection.";

/// Uniform error shape for every backend call.
///
/// `status` is the HTTP status, or 0 when no response was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error body the backend sends alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    details: Option<String>,
}

impl ApiError {
    pub fn from_status(status: u16, details: Option<String>) -> Self {
        Self {
            status,
            message: message_for_status(status),
            details,
        }
    }

    pub fn network(details: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: NETWORK_ERROR_MESSAGE.to_string(),
            details: Some(details.into()),
        }
    }

    /// Normalize a non-2xx response body. The body's `message` wins as
    /// details, then its `details`, then the raw text.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        let details = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.message.or(parsed.details),
            Err(_) => None,
        }
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });
        Self::from_status(status, details)
    }

    pub fn is_network(&self) -> bool {
        self.status == 0
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), Some(err.to_string())),
            None => Self::network(err.to_string()),
        }
    }
}

/// Fixed user-facing message for a status code.
pub fn message_for_status(status: u16) -> String {
    match status {
        0 => NETWORK_ERROR_MESSAGE.to_string(),
        400 => "Invalid request. Please check your input.".to_string(),
        404 => "The requested resource was not found.".to_string(),
        413 => "File is too large. Maximum size is 10MB.".to_string(),
        500 => "Server error occurred. Please try again later.".to_string(),
        503 => "Service is temporarily unavailable. Please try again later.".to_string(),
        other => format!("An error occurred ({}). Please try again.", other),
    }
}
