use crate::config::ValidationError;
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("Asset origin timed out")]
    UpstreamTimeout,

    #[error("Asset origin request failed: {0}")]
    UpstreamRequestFailed(String),

    #[error("Failed to read asset origin response body: {0}")]
    ResponseBodyError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SplitterError {
    /// Status returned to the visitor when forwarding fails.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SplitterError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            SplitterError::UpstreamRequestFailed(_) | SplitterError::ResponseBodyError(_) => {
                StatusCode::BAD_GATEWAY
            }
            SplitterError::Io(_)
            | SplitterError::InvalidConfig(_)
            | SplitterError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
