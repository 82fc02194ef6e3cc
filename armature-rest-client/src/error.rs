//! REST client error types.

use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for opaque collaborator and hook errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for REST client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Client-local failures that are not attributable to the network or the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RestError {
    /// The response carried no body.
    #[error("Response contained no data")]
    NoData,

    /// The response body could not be converted to the requested shape.
    #[error("Failed to serialize response data")]
    SerializationError,

    /// Request data (headers or body) could not be encoded.
    #[error("Failed to encode request data")]
    EncodingError,

    /// Moving a downloaded file to its destination failed.
    #[error("File manager operation failed")]
    FileManagerError,

    /// The transport produced no downloaded file.
    #[error("Transport produced no retrievable file")]
    InvalidFile,

    /// URL template substitution failed or produced a malformed URL.
    #[error("Invalid URL template substitution")]
    InvalidSubstitution,
}

/// Opaque error reported by the transport.
#[derive(Debug, Error)]
#[error("{inner}")]
pub struct TransportError {
    inner: BoxError,
}

impl TransportError {
    /// Wrap any error as a transport error.
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            inner: error.into(),
        }
    }

    /// Get a reference to the wrapped error.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    /// Consume and return the wrapped error.
    pub fn into_inner(self) -> BoxError {
        self.inner
    }

    /// Check if the underlying transport reported a timeout.
    pub fn is_timeout(&self) -> bool {
        self.inner
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout())
    }

    /// Check if the underlying transport failed to connect.
    pub fn is_connect(&self) -> bool {
        self.inner
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_connect())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::new(error)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error)
    }
}

/// Errors raised while parsing, navigating, or decoding a response body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// An object key along the path does not exist.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// An array index along the path is out of bounds.
    #[error("Index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Length of the array.
        len: usize,
    },

    /// A path segment was applied to a value of the wrong kind.
    #[error("Cannot apply segment {segment} to a JSON {found}")]
    TypeMismatch {
        /// Offending segment.
        segment: String,
        /// Kind of value found at that position.
        found: &'static str,
    },

    /// The path has more segments than allowed.
    #[error("Path depth {depth} exceeds the maximum of {max}")]
    PathTooDeep {
        /// Depth of the supplied path.
        depth: usize,
        /// Maximum supported depth.
        max: usize,
    },

    /// The located value is not an array.
    #[error("Expected a JSON array, found {0}")]
    NotAnArray(&'static str),

    /// The located value could not be decoded into the target type.
    #[error("Failed to decode value: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Errors produced by the circuit breaker.
///
/// These are handed to the configured fallback and never stored in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerError {
    /// The circuit is open and the call was rejected.
    #[error("Circuit breaker is open, request rejected")]
    Open,

    /// The call exceeded the breaker timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors delivered in a [`RestResponse`](crate::RestResponse) or by the client builder.
#[derive(Debug, Error)]
pub enum Error {
    /// Client-local failure.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// Failure reported by the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Failure reported by the decoder.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Error returned by the caller's response-to-error hook.
    #[error("Response rejected: {0}")]
    Response(BoxError),

    /// The circuit breaker diverted the call to its fallback.
    #[error("Circuit breaker diverted the request to its fallback")]
    CircuitOpen,

    /// The client configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Get the client-local error, if this is one.
    pub fn rest_error(&self) -> Option<RestError> {
        match self {
            Self::Rest(e) => Some(*e),
            _ => None,
        }
    }

    /// Check if this error came from the transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this error came from the decoder.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Check if the call was diverted by the circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }
}
