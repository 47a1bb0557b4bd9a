use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("chapter title not found in {url}")]
    MissingTitle { url: String },
    #[error("chapter body not found in {url}")]
    MissingBody { url: String },
}

/// Reasons a chain step cannot proceed. Both variants end the chain
/// (`Aborted`) or skip the work for this run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Outcome classes of one generative service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("blocked by content policy: {0}")]
    Blocked(String),
    #[error("service returned empty output")]
    Empty,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
