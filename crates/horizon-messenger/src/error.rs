//! Error types for the messenger.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::transport::TransportError;

/// Shared, cloneable error cause.
///
/// Causes are reference counted so a single failure can be handed to the
/// interceptor and then to the failure handler.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Errors produced while building, dispatching or decoding a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessengerError {
    /// The request URL could not be parsed.
    #[error("invalid URL: {0}")]
    UrlInvalid(String),

    /// Request parameters could not be encoded.
    #[error("failed to encode request: {0}")]
    EncodeFailure(#[source] Cause),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    DecodeFailure(#[source] Cause),

    /// The transport reported a failure.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] Cause),

    /// The response status was outside `[200, 300)`.
    #[error("HTTP status {0} is out of the success range")]
    StatusOutOfRange(u16),

    /// The transport completed without a response.
    #[error("no response was received")]
    ResponseMissing,

    /// A codec was handed a value of a shape it does not accept.
    #[error("serializer expected {expected}, got {actual}")]
    SerializerMismatch {
        /// Shape the codec accepts.
        expected: String,
        /// Shape it was given.
        actual: String,
    },

    /// Resume was requested for a download that has no resume token.
    #[error("no resume data is available for this download")]
    ResumeUnavailable,

    /// Failure with no further information.
    #[error("unknown error")]
    Unknown,
}

impl MessengerError {
    /// Wrap an error as an [`EncodeFailure`](Self::EncodeFailure).
    pub fn encode<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::EncodeFailure(Arc::new(err))
    }

    /// Wrap an error as a [`DecodeFailure`](Self::DecodeFailure).
    pub fn decode<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::DecodeFailure(Arc::new(err))
    }

    /// Wrap an error as a [`TransportFailure`](Self::TransportFailure).
    pub fn transport<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::TransportFailure(Arc::new(err))
    }

    /// Create a [`SerializerMismatch`](Self::SerializerMismatch).
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::SerializerMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// The HTTP status carried by a [`StatusOutOfRange`](Self::StatusOutOfRange) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::StatusOutOfRange(status) => Some(*status),
            _ => None,
        }
    }

    /// The underlying cause, if this variant wraps one.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::EncodeFailure(cause) | Self::DecodeFailure(cause) | Self::TransportFailure(cause) => {
                Some(cause)
            }
            _ => None,
        }
    }

    /// Whether this is a transport failure caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::TransportFailure(cause) => matches!(
                cause.downcast_ref::<TransportError>(),
                Some(TransportError::Cancelled)
            ),
            _ => false,
        }
    }
}

impl From<url::ParseError> for MessengerError {
    fn from(err: url::ParseError) -> Self {
        Self::UrlInvalid(err.to_string())
    }
}

impl From<TransportError> for MessengerError {
    fn from(err: TransportError) -> Self {
        Self::transport(err)
    }
}

/// A specialized Result type for messenger operations.
pub type Result<T> = std::result::Result<T, MessengerError>;
