use http::StatusCode;
use std::io;
use std::sync::Arc;

/// Boxed error used as the error type of the tower adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the gzip layer.
///
/// I/O causes are reference counted so that a cached result (see
/// [`ChunkedWriter::finalize`](crate::ChunkedWriter::finalize)) can be handed
/// out to every caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The payload is not a valid gzip stream.
    #[error("invalid gzip payload: {0}")]
    Decode(#[source] Arc<io::Error>),

    /// The gzip encoder failed.
    #[error("gzip encoding failed: {0}")]
    Encode(#[source] Arc<io::Error>),

    /// The underlying transport rejected a write or flush.
    #[error("transport write failed: {0}")]
    Write(#[source] Arc<io::Error>),

    /// A write was attempted after the stream was finalized.
    #[error("write after the stream was finalized")]
    WriteAfterClose,

    /// An excluded path pattern failed to compile.
    #[error("invalid excluded path pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub(crate) fn decode(err: io::Error) -> Self {
        Error::Decode(Arc::new(err))
    }

    pub(crate) fn encode(err: io::Error) -> Self {
        Error::Encode(Arc::new(err))
    }

    pub(crate) fn write(err: io::Error) -> Self {
        Error::Write(Arc::new(err))
    }

    /// Status code to answer with when this error aborts an exchange.
    ///
    /// Malformed input is the peer's fault and maps to `400 Bad Request`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
