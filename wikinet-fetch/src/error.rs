use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Transport and decode failures end a fetch loop but keep its partial results.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::MalformedResponse(_))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::MalformedResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
