use memesh_core::error::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemeshClientError>;

#[derive(Debug, Error)]
pub enum MemeshClientError {
    #[error("invalid base url")]
    InvalidBaseUrl,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response too large")]
    ResponseTooLarge,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("timed out")]
    Timeout,
}

impl From<MemeshClientError> for CoreError {
    fn from(err: MemeshClientError) -> Self {
        match err {
            MemeshClientError::Status(401) => CoreError::Unauthorized,
            other => CoreError::Transport(other.to_string()),
        }
    }
}
