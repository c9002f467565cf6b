use tasksync_core::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Database(e) => SyncError::Storage(e.to_string()),
            ClientError::Http(e) if e.is_decode() => SyncError::Serialization(e.to_string()),
            ClientError::Http(e) => SyncError::Transport(e.to_string()),
            ClientError::WebSocket(e) => SyncError::Transport(e.to_string()),
            ClientError::InvalidUrl(url) => SyncError::Validation(format!("invalid server URL: {url}")),
            ClientError::Sync(e) => e,
        }
    }
}
