use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by codecs and session stores.
///
/// Read-side errors (`NotFound`, `Expired`, `InvalidKey`, `Decode`) all mean "no session" to the
/// session layer; only write-side errors fail a request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("session not found")]
    NotFound,

    #[error("session has expired")]
    Expired,

    #[error("invalid session key")]
    InvalidKey,

    #[error("reserved session key: {0}")]
    ReservedKey(String),

    #[error("encode: {0}")]
    Encode(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("backend: {0}")]
    Backend(String),
}

impl Error {
    /// True for errors that only mean the session could not be loaded.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::Expired | Error::InvalidKey | Error::Decode(_)
        )
    }
}
