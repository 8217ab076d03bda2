//! Fluent request construction on a session.

use std::sync::Arc;

use bytes::Bytes;

use super::{Handlers, Intercept, Interception, Session};
use crate::codec::{DataSerializer, Decoded, JsonDeserializer, JsonSerializer, Parameters, RequestSerializer, ResponseDeserializer};
use crate::download::DownloadDeserializer;
use crate::error::{MessengerError, Result};
use crate::http::{HttpMethod, RequestBuilder, RequestDescriptor, ResponseDescriptor, TransferProgress};
use crate::registry::TaskHandle;

enum CallKind {
    Data,
    Upload(Bytes),
    Download(Arc<dyn DownloadDeserializer>),
}

/// A request being configured on a [`Session`].
///
/// Serializes with [`JsonSerializer`] and decodes with [`JsonDeserializer`]
/// unless told otherwise. Downloads default to [`DataSerializer`], which
/// sends no `Content-Type`. Nothing is sent until [`send`](Self::send).
#[must_use = "calls do nothing until sent"]
pub struct Call<'s> {
    session: &'s Session,
    kind: CallKind,
    builder: RequestBuilder,
    serializer: Arc<dyn RequestSerializer>,
    deserializer: Arc<dyn ResponseDeserializer>,
    handlers: Handlers,
}

impl<'s> Call<'s> {
    fn new(session: &'s Session, url: String, method: HttpMethod, kind: CallKind) -> Self {
        Self {
            session,
            kind,
            builder: RequestBuilder::new(url, method),
            serializer: Arc::new(JsonSerializer::new()),
            deserializer: Arc::new(JsonDeserializer::new()),
            handlers: Handlers::default(),
        }
    }

    pub(super) fn data(session: &'s Session, url: String, method: HttpMethod) -> Self {
        Self::new(session, url, method, CallKind::Data)
    }

    pub(super) fn upload(session: &'s Session, url: String, method: HttpMethod, body: Bytes) -> Self {
        Self::new(session, url, method, CallKind::Upload(body))
    }

    pub(super) fn download(session: &'s Session, url: String, deserializer: Arc<dyn DownloadDeserializer>) -> Self {
        let mut call = Self::new(session, url, HttpMethod::Get, CallKind::Download(deserializer));
        call.serializer = Arc::new(DataSerializer::new());
        call
    }

    /// Add a per-call header. Per-call headers win over every other layer.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Set the request parameters.
    pub fn parameters(mut self, parameters: impl Into<Parameters>) -> Self {
        self.builder = self.builder.parameters(parameters.into());
        self
    }

    /// Set the request serializer.
    pub fn serializer(mut self, serializer: impl RequestSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Set the response deserializer. Ignored for downloads.
    pub fn deserializer(mut self, deserializer: impl ResponseDeserializer + 'static) -> Self {
        self.deserializer = Arc::new(deserializer);
        self
    }

    /// Set the upload progress handler.
    pub fn on_request_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, TransferProgress) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_request_progress(f);
        self
    }

    /// Set the response progress handler.
    pub fn on_response_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, TransferProgress) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_response_progress(f);
        self
    }

    /// Set the interceptor.
    pub fn intercept<F>(mut self, f: F) -> Self
    where
        F: Fn(&Interception<'_>) -> Intercept + Send + Sync + 'static,
    {
        self.handlers = self.handlers.intercept(f);
        self
    }

    /// Set the success handler.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, Option<Decoded>) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_success(f);
        self
    }

    /// Set the failure handler.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, MessengerError) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_failure(f);
        self
    }

    /// Build the request with the session's header layers, without sending it.
    pub fn build(&self) -> Result<RequestDescriptor> {
        self.layered(self.builder.clone()).build(self.serializer.as_ref(), self.response_deserializer().as_ref())
    }

    /// Build the request and hand it to the transport.
    ///
    /// Construction errors are returned before anything is dispatched.
    pub fn send(self) -> Result<TaskHandle> {
        let request = self.build()?;
        let Call {
            session,
            kind,
            deserializer,
            handlers,
            ..
        } = self;
        match kind {
            CallKind::Data => session.issue(request, deserializer, handlers),
            CallKind::Upload(_) => session.issue_upload(request, deserializer, handlers),
            CallKind::Download(download) => session.issue_download(request, download, handlers),
        }
    }

    fn layered(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .transport_headers(self.session.transport().default_headers())
            .default_headers(self.session.default_headers());
        match self.kind {
            CallKind::Upload(ref body) => builder.body(body.clone()),
            _ => builder,
        }
    }

    fn response_deserializer(&self) -> Arc<dyn ResponseDeserializer> {
        match self.kind {
            CallKind::Download(ref download) => download.clone(),
            _ => self.deserializer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{TextSerializer, UrlEncodedSerializer};
    use crate::download::FileDownloadDeserializer;
    use crate::transport::ReqwestTransport;

    fn session() -> Session {
        let transport = ReqwestTransport::builder().user_agent("agent/1").build().unwrap();
        Session::builder()
            .transport(Arc::new(transport))
            .default_header("X-Env", "test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_call_layers_session_headers() {
        let session = session();
        let request = session
            .request("https://example.com/items", HttpMethod::Get)
            .header("X-Env", "call")
            .build()
            .unwrap();
        assert_eq!(request.header("User-Agent"), Some("agent/1"));
        assert_eq!(request.header("X-Env"), Some("call"));
        assert_eq!(request.header("Accept"), Some("application/json"));
    }

    #[test]
    fn test_query_parameters_on_get() {
        let session = session();
        let request = session
            .request("https://example.com/items", HttpMethod::Get)
            .serializer(UrlEncodedSerializer::new())
            .parameters(Parameters::pairs([("page", "2")]))
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("page=2"));
        assert!(request.body().is_none());
    }

    #[test]
    fn test_upload_body_overrides_parameters() {
        let session = session();
        let request = session
            .upload("https://example.com/u", HttpMethod::Put, Bytes::from_static(b"raw"))
            .serializer(TextSerializer::new())
            .parameters("ignored")
            .build()
            .unwrap();
        assert_eq!(request.body().map(|b| &b[..]), Some(&b"raw"[..]));
    }

    #[test]
    fn test_download_negotiates_with_download_deserializer() {
        let session = session();
        let request = session
            .download("https://example.com/f", Arc::new(FileDownloadDeserializer::new("/tmp/f")))
            .build()
            .unwrap();
        assert_eq!(request.header("Accept"), Some("*/*"));
        assert_eq!(request.header("Content-Type"), None);
        assert!(request.body().is_none());
    }

    #[test]
    fn test_encode_failure_is_returned_before_dispatch() {
        let session = session();
        let err = session
            .request("https://example.com/a", HttpMethod::Post)
            .serializer(TextSerializer::new())
            .parameters(serde_json::json!({"a": 1}))
            .send()
            .unwrap_err();
        assert!(matches!(err, MessengerError::EncodeFailure(_)));
        assert!(session.pending_tasks().is_empty());
    }
}
