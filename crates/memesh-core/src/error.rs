use memesh_api::ValidationError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("message has neither text nor image")]
    EmptyMessage,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("superseded by a newer activation")]
    Superseded,
    #[error("validation {0}")]
    Validation(String),
    #[error("transport {0}")]
    Transport(String),
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::EmptyMessage => CoreError::EmptyMessage,
            ValidationError::Empty("credential") => CoreError::InvalidCredential,
            other => CoreError::Validation(other.to_string()),
        }
    }
}
