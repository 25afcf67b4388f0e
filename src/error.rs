use serde::Serialize;

use crate::api::ApiError;
use crate::validation::ValidationError;

/// Everything a front-end operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("A question is already being answered.")]
    Busy,
    #[error("{0}")]
    Upload(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Backend details, when the failure came from the gateway.
    pub fn details(&self) -> Option<&str> {
        match self {
            AppError::Api(e) => e.details.as_deref(),
            _ => None,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_pass_through() {
        let err = AppError::from(ApiError::from_status(404, None));
        assert_eq!(err.to_string(), "The requested resource was not found.");
        assert_eq!(err.details(), None);

        let err = AppError::from(ValidationError::EmptyQuestion);
        assert_eq!(err.to_string(), "Please enter a question.");
        assert_eq!(
            serde_json::to_string(&AppError::Busy).unwrap(),
            "\"A question is already being answered.\""
        );
    }
}
