//! Tracing targets and request/response trace lines.
//!
//! All messenger logging goes through `tracing` with the targets listed in
//! [`targets`], so subscribers can filter per concern:
//!
//! ```text
//! RUST_LOG=horizon_messenger::trace=debug,horizon_messenger::registry=warn
//! ```
//!
//! The request/response trace is emitted at fixed points: request
//! dispatched, request headers, request body preview, response received,
//! and decode result.

use crate::codec::Decoded;
use crate::error::MessengerError;
use crate::http::{RequestDescriptor, ResponseHead};
use crate::registry::TaskHandle;

/// Tracing target names.
pub mod targets {
    /// Session lifecycle and dispatch.
    pub const SESSION: &str = "horizon_messenger::session";
    /// Task registry bookkeeping.
    pub const REGISTRY: &str = "horizon_messenger::registry";
    /// Transport implementation.
    pub const TRANSPORT: &str = "horizon_messenger::transport";
    /// Trust and authentication challenges.
    pub const TRUST: &str = "horizon_messenger::trust";
    /// Request/response trace lines.
    pub const TRACE: &str = "horizon_messenger::trace";
}

/// How request bodies appear in the trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyPreview {
    /// Body is not traced.
    Hidden,
    /// Only the body length is traced.
    #[default]
    ByteCount,
    /// Body is traced as UTF-8 text, truncated to `limit` bytes.
    Text {
        /// Maximum number of bytes shown.
        limit: usize,
    },
}

impl BodyPreview {
    fn render(self, body: &[u8]) -> Option<String> {
        match self {
            Self::Hidden => None,
            Self::ByteCount => Some(format!("{} bytes", body.len())),
            Self::Text { limit } => {
                let shown = &body[..body.len().min(limit)];
                let mut text = String::from_utf8_lossy(shown).into_owned();
                if body.len() > limit {
                    text.push_str("...");
                }
                Some(text)
            }
        }
    }
}

/// Trace a request handed to the transport.
pub(crate) fn request_dispatched(handle: TaskHandle, request: &RequestDescriptor, preview: BodyPreview) {
    tracing::debug!(
        target: targets::TRACE,
        %handle,
        method = %request.method(),
        url = %request.url(),
        "request dispatched"
    );
    for (name, value) in request.headers() {
        tracing::trace!(target: targets::TRACE, %handle, name = %name, value = %value, "request header");
    }
    match request.body() {
        Some(body) => {
            if let Some(preview) = preview.render(body) {
                tracing::trace!(target: targets::TRACE, %handle, body = %preview, "request body");
            }
        }
        None => tracing::trace!(target: targets::TRACE, %handle, "request has no body"),
    }
}

/// Trace a response head.
pub(crate) fn response_received(handle: TaskHandle, response: &ResponseHead) {
    tracing::debug!(
        target: targets::TRACE,
        %handle,
        status = response.status,
        url = ?response.url.as_ref().map(|u| u.as_str()),
        "response received"
    );
    for (name, value) in &response.headers {
        tracing::trace!(target: targets::TRACE, %handle, name = %name, value = %value, "response header");
    }
}

/// Trace the final outcome of a task.
pub(crate) fn decode_result(handle: TaskHandle, result: &Result<Option<Decoded>, MessengerError>) {
    match result {
        Ok(Some(decoded)) => {
            tracing::debug!(target: targets::TRACE, %handle, kind = decoded_kind(decoded), "decoded response")
        }
        Ok(None) => tracing::debug!(target: targets::TRACE, %handle, "response without body"),
        Err(err) => tracing::debug!(target: targets::TRACE, %handle, error = %err, "request failed"),
    }
}

fn decoded_kind(decoded: &Decoded) -> &'static str {
    match decoded {
        Decoded::Bytes(_) => "bytes",
        Decoded::Text(_) => "text",
        Decoded::Json(_) => "json",
        Decoded::File(_) => "file",
    }
}
