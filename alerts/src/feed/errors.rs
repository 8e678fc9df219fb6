use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("numeric parse error: {0}")]
    Parse(String),

    #[error("currency not supported: {0}")]
    UnknownCurrency(String),
}
