//! Error types for session and transfer operations.

/// Alias for `Result<T, injector::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the session controller and the bulk downloader.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed call input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failure, full queue, or oversized transfer.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// Topic, subtopic or code outside the protocol vocabulary.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Operation on a torn-down or inconsistent object.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// HTTP transport failure (connect, status, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Publish/subscribe transport refused an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Report encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Sink write or filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<injector_proto::Error> for Error {
    fn from(e: injector_proto::Error) -> Self {
        match e {
            injector_proto::Error::InvalidArgument(m) => Self::InvalidArgument(m),
            injector_proto::Error::ResourceExhausted(m) => Self::ResourceExhausted(m),
            injector_proto::Error::NotSupported(m) => Self::NotSupported(m),
            injector_proto::Error::Encode(e) => Self::Encode(e.to_string()),
            other => Self::InvalidState(other.to_string()),
        }
    }
}
