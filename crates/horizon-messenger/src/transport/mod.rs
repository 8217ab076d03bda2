//! Transport boundary.
//!
//! A [`Transport`] moves bytes; the session owns everything else. The
//! session hands each transport a [`TransportEvents`] sink at construction
//! and the transport reports every task through it: response head, body
//! chunks, upload and download progress, a finished download file, trust
//! challenges, and exactly one terminal completion per task.
//!
//! [`ReqwestTransport`] is the bundled implementation on top of `reqwest`
//! and `tokio`.

mod client;
pub mod runtime;
mod tls;

use std::sync::Arc;

use crate::download::ResumeToken;
use crate::http::{Headers, RequestDescriptor};
use crate::registry::TaskHandle;

pub use crate::session::TransportEvents;
pub use client::{ReqwestConfig, ReqwestTransport, ReqwestTransportBuilder};
pub use tls::TlsVersion;

/// Errors reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The task was cancelled.
    #[error("task was cancelled")]
    Cancelled,
    /// The request timed out.
    #[error("request timed out")]
    Timeout,
    /// Connection refused or failed.
    #[error("connection error: {0}")]
    Connection(String),
    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),
    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(String),
    /// Any other request failure.
    #[error("HTTP request error: {0}")]
    Request(String),
    /// An authentication challenge was cancelled by the trust delegate.
    #[error("authentication challenge was cancelled")]
    ChallengeCancelled,
    /// Resume data could not be used.
    #[error("invalid resume data: {0}")]
    InvalidResumeData(String),
    /// The session was invalidated.
    #[error("session has been invalidated")]
    Invalidated,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The byte-level transport driven by a [`Session`](crate::Session).
///
/// All methods return immediately; outcomes are reported through the
/// [`TransportEvents`] passed to [`attach`](Self::attach). Every started
/// task must end with exactly one
/// [`did_complete`](TransportEvents::did_complete).
pub trait Transport: Send + Sync {
    /// Receive the event sink. Called once, before any task starts.
    fn attach(&self, events: TransportEvents);

    /// Headers the transport adds to every request.
    fn default_headers(&self) -> Headers {
        Headers::new()
    }

    /// Start a data task.
    fn start_data(&self, handle: TaskHandle, request: Arc<RequestDescriptor>);

    /// Start an upload task. The request body is the upload payload.
    fn start_upload(&self, handle: TaskHandle, request: Arc<RequestDescriptor>);

    /// Start a download task.
    fn start_download(&self, handle: TaskHandle, request: Arc<RequestDescriptor>);

    /// Continue a cancelled download from its resume token.
    fn resume_download(&self, handle: TaskHandle, token: ResumeToken);

    /// Stop a running download and capture its continuation data.
    ///
    /// Called right before [`cancel`](Self::cancel). The transport must not
    /// write to the partial file afterwards. Returns `None` for data and
    /// upload tasks, finished downloads and unknown handles.
    fn resume_token(&self, handle: TaskHandle) -> Option<ResumeToken> {
        let _ = handle;
        None
    }

    /// Cancel a task. The task still reports its terminal completion, which
    /// may happen before this returns.
    fn cancel(&self, handle: TaskHandle);

    /// Cancel everything and refuse new tasks.
    fn invalidate(&self);
}
