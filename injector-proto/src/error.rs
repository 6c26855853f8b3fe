//! Error types for wire-level operations.

/// Alias for `Result<T, injector_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or classifying protocol values.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed input (bad address string, oversized serial number, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation for a payload could not be satisfied.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Topic or code outside the closed protocol vocabulary.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// MessagePack encoder failure.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}
