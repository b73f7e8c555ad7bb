use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid destination URL")]
    InvalidDestination,
    #[error("not signed in")]
    NotAuthenticated,
    #[error("no location available yet")]
    NoSampleAvailable,
    #[error("server returned HTTP {status_code}: {body}")]
    Http { status_code: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}
