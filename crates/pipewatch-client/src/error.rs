use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Live tracking paths log these and keep the last good view.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}
