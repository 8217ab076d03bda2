//! The session: one transport, one task registry, many requests.
//!
//! A [`Session`] builds request descriptors, registers the caller's handlers
//! under a fresh [`TaskHandle`], and hands the descriptor to its
//! [`Transport`]. Every transport event comes back through
//! [`TransportEvents`] and is routed to the handlers registered for that
//! handle. Calls never block; completion is observed only through the
//! success and failure handlers.
//!
//! # Example
//!
//! ```ignore
//! use horizon_messenger::{HttpMethod, Parameters, Session, UrlEncodedSerializer};
//!
//! let session = Session::new();
//! session
//!     .request("https://api.example.com/items", HttpMethod::Get)
//!     .parameters(Parameters::pairs([("page", "2")]))
//!     .serializer(UrlEncodedSerializer::new())
//!     .on_success(|_, _, response, decoded| println!("{:?}", decoded))
//!     .on_failure(|_, _, _, err| eprintln!("request failed: {err}"))
//!     .send()?;
//! ```

mod calls;
mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

pub use calls::Call;
pub use dispatch::TransportEvents;

use crate::codec::{Decoded, ResponseDeserializer};
use crate::download::{DownloadDeserializer, DownloadState, ResumeToken};
use crate::error::{MessengerError, Result};
use crate::http::{Headers, HttpMethod, RawData, RequestDescriptor, ResponseDescriptor, TransferProgress};
use crate::registry::{CallbackBundle, TaskHandle, TaskRegistry};
use crate::trace::{self, BodyPreview, targets};
use crate::transport::{ReqwestTransport, Transport};
use crate::trust::{TrustDelegate, TrustSlot};

/// Upload or download progress handler.
pub type ProgressHandler = Arc<dyn Fn(&Session, &RequestDescriptor, TransferProgress) + Send + Sync>;

/// Outcome override hook, run once per terminal event.
pub type Interceptor = Arc<dyn Fn(&Interception<'_>) -> Intercept + Send + Sync>;

/// Success handler: the response and the decoded payload, if any.
pub type SuccessHandler =
    Arc<dyn Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, Option<Decoded>) + Send + Sync>;

/// Failure handler: the response, if one arrived, and the terminal error.
pub type FailureHandler =
    Arc<dyn Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, MessengerError) + Send + Sync>;

/// What an interceptor sees.
pub struct Interception<'a> {
    /// The session the task belongs to.
    pub session: &'a Session,
    /// The request being completed.
    pub request: &'a RequestDescriptor,
    /// Raw payload: the accumulated body, or the saved file of a download.
    pub data: Option<&'a RawData>,
    /// The response, if one arrived.
    pub response: Option<&'a ResponseDescriptor>,
    /// The error reported so far.
    pub error: Option<&'a MessengerError>,
}

/// An interceptor's verdict on the reported error.
#[derive(Clone, Debug, Default)]
pub enum Intercept {
    /// Leave the reported error as is.
    #[default]
    Keep,
    /// Drop the reported error.
    Clear,
    /// Replace the reported error, or inject one where there was none.
    Replace(MessengerError),
}

/// Handlers registered with a task.
#[derive(Clone, Default)]
pub struct Handlers {
    /// Upload progress.
    pub request_progress: Option<ProgressHandler>,
    /// Response or download progress.
    pub response_progress: Option<ProgressHandler>,
    /// Outcome override hook.
    pub interceptor: Option<Interceptor>,
    /// Success handler.
    pub success: Option<SuccessHandler>,
    /// Failure handler.
    pub failure: Option<FailureHandler>,
}

impl Handlers {
    /// Set the upload progress handler.
    pub fn on_request_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, TransferProgress) + Send + Sync + 'static,
    {
        self.request_progress = Some(Arc::new(f));
        self
    }

    /// Set the response progress handler.
    pub fn on_response_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, TransferProgress) + Send + Sync + 'static,
    {
        self.response_progress = Some(Arc::new(f));
        self
    }

    /// Set the interceptor.
    pub fn intercept<F>(mut self, f: F) -> Self
    where
        F: Fn(&Interception<'_>) -> Intercept + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(f));
        self
    }

    /// Set the success handler.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, Option<Decoded>) + Send + Sync + 'static,
    {
        self.success = Some(Arc::new(f));
        self
    }

    /// Set the failure handler.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &RequestDescriptor, Option<&ResponseDescriptor>, MessengerError) + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(f));
        self
    }

    fn into_bundle(self, deserializer: Arc<dyn ResponseDeserializer>) -> CallbackBundle {
        CallbackBundle {
            deserializer,
            download: None,
            request_progress: self.request_progress,
            response_progress: self.response_progress,
            interceptor: self.interceptor,
            success: self.success,
            failure: self.failure,
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("request_progress", &self.request_progress.is_some())
            .field("response_progress", &self.response_progress.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .field("success", &self.success.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

/// Session configuration.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Headers added to every request, below per-call headers.
    pub default_headers: Headers,
    /// How request bodies appear in the trace.
    pub body_preview: BodyPreview,
}

/// Builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    trust_delegate: Option<Arc<dyn TrustDelegate>>,
}

impl SessionBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default header.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    /// Set the body preview policy.
    pub fn body_preview(mut self, preview: BodyPreview) -> Self {
        self.config.body_preview = preview;
        self
    }

    /// Use a specific transport instead of the default [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Install a trust delegate.
    pub fn trust_delegate(mut self, delegate: Arc<dyn TrustDelegate>) -> Self {
        self.trust_delegate = Some(delegate);
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<Session> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::builder().build()?),
        };
        let session = Session::from_parts(self.config, transport);
        session.inner.trust.set(self.trust_delegate);
        Ok(session)
    }
}

pub(crate) struct SessionInner {
    config: RwLock<SessionConfig>,
    registry: TaskRegistry,
    transport: Arc<dyn Transport>,
    trust: TrustSlot,
    downloads: Mutex<HashMap<TaskHandle, DownloadState>>,
    invalidated: AtomicBool,
}

/// Issues requests over a transport and dispatches their outcomes.
///
/// Cheap to clone; clones share the registry and the transport.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over the default transport.
    ///
    /// # Panics
    ///
    /// Panics if the default transport cannot be created.
    pub fn new() -> Self {
        SessionBuilder::new()
            .build()
            .expect("Failed to create session with default configuration")
    }

    /// Create a builder for configuring a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session over the given transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::from_parts(SessionConfig::default(), transport)
    }

    /// A lazily created process-wide session over the default transport.
    ///
    /// # Panics
    ///
    /// Panics on first use if the default transport cannot be created.
    pub fn shared() -> &'static Session {
        static SHARED: OnceLock<Session> = OnceLock::new();
        SHARED.get_or_init(Session::new)
    }

    fn from_parts(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(SessionInner {
            config: RwLock::new(config),
            registry: TaskRegistry::new(),
            transport,
            trust: TrustSlot::default(),
            downloads: Mutex::new(HashMap::new()),
            invalidated: AtomicBool::new(false),
        });
        inner
            .transport
            .attach(TransportEvents::new(Arc::downgrade(&inner)));
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// The transport this session drives.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Start building a data request.
    pub fn request(&self, url: impl Into<String>, method: HttpMethod) -> Call<'_> {
        Call::data(self, url.into(), method)
    }

    /// Start building an upload of `body`.
    pub fn upload(&self, url: impl Into<String>, method: HttpMethod, body: impl Into<bytes::Bytes>) -> Call<'_> {
        Call::upload(self, url.into(), method, body.into())
    }

    /// Start building a download saved by `deserializer`.
    pub fn download(&self, url: impl Into<String>, deserializer: Arc<dyn DownloadDeserializer>) -> Call<'_> {
        Call::download(self, url.into(), deserializer)
    }

    /// Issue a data task for a built request.
    pub fn issue(
        &self,
        request: RequestDescriptor,
        deserializer: Arc<dyn ResponseDeserializer>,
        handlers: Handlers,
    ) -> Result<TaskHandle> {
        let request = Arc::new(request);
        self.dispatch(request.clone(), handlers.into_bundle(deserializer), |transport, handle| {
            transport.start_data(handle, request)
        })
    }

    /// Issue an upload task. The request body is the upload payload.
    pub fn issue_upload(
        &self,
        request: RequestDescriptor,
        deserializer: Arc<dyn ResponseDeserializer>,
        handlers: Handlers,
    ) -> Result<TaskHandle> {
        let request = Arc::new(request);
        self.dispatch(request.clone(), handlers.into_bundle(deserializer), |transport, handle| {
            transport.start_upload(handle, request)
        })
    }

    /// Issue a download task saved by `deserializer`.
    pub fn issue_download(
        &self,
        request: RequestDescriptor,
        deserializer: Arc<dyn DownloadDeserializer>,
        handlers: Handlers,
    ) -> Result<TaskHandle> {
        let request = Arc::new(request);
        let bundle = Self::download_bundle(deserializer, handlers);
        self.dispatch(request.clone(), bundle, |transport, handle| {
            transport.start_download(handle, request)
        })
    }

    /// Cancel a task.
    ///
    /// For a download that can be continued, the resume token is stored on
    /// its [`DownloadState`] and returned. The token is in place before the
    /// task completes through its failure handler.
    pub fn cancel(&self, handle: TaskHandle) -> Option<ResumeToken> {
        let token = self.inner.transport.resume_token(handle);
        {
            let mut downloads = self.inner.downloads.lock();
            match token {
                Some(ref token) => {
                    if let Some(state) = downloads.get_mut(&handle) {
                        state.set_resume_token(Some(token.clone()));
                    }
                }
                None => {
                    downloads.remove(&handle);
                }
            }
        }
        self.inner.transport.cancel(handle);
        tracing::debug!(target: targets::SESSION, %handle, resumable = token.is_some(), "task cancelled");
        token
    }

    /// Resume a cancelled download from its state.
    ///
    /// Fails with [`MessengerError::ResumeUnavailable`] if the state holds
    /// no resume token or its token was already resumed. On success the old
    /// state is forgotten and a new one is tracked under the returned handle.
    pub fn resume(
        &self,
        state: &DownloadState,
        deserializer: Arc<dyn DownloadDeserializer>,
        handlers: Handlers,
    ) -> Result<TaskHandle> {
        let token = state
            .resume_token()
            .cloned()
            .ok_or(MessengerError::ResumeUnavailable)?;
        self.resume_with_token(token, deserializer, handlers)
    }

    /// Resume a download from a resume token.
    ///
    /// A token resumes once. Reusing it, or any clone of it, fails with
    /// [`MessengerError::ResumeUnavailable`]. States still holding the token
    /// are forgotten.
    pub fn resume_with_token(
        &self,
        token: ResumeToken,
        deserializer: Arc<dyn DownloadDeserializer>,
        handlers: Handlers,
    ) -> Result<TaskHandle> {
        if !token.claim() {
            tracing::debug!(target: targets::SESSION, "resume token already used");
            return Err(MessengerError::ResumeUnavailable);
        }
        let request = token.request().clone();
        let bundle = Self::download_bundle(deserializer, handlers);
        let started = token.clone();
        let handle = self
            .dispatch(request, bundle, |transport, handle| {
                transport.resume_download(handle, started)
            })
            .inspect_err(|_| token.release())?;

        self.inner.downloads.lock().retain(|_, state| {
            !state
                .resume_token()
                .is_some_and(|held| held.same_as(&token))
        });
        Ok(handle)
    }

    /// Install or remove the trust delegate.
    ///
    /// Takes effect for challenges that arrive after the call.
    pub fn set_trust_delegate(&self, delegate: Option<Arc<dyn TrustDelegate>>) {
        self.inner.trust.set(delegate);
    }

    /// Whether a trust delegate is installed.
    pub fn has_trust_delegate(&self) -> bool {
        self.inner.trust.is_set()
    }

    /// Cancel every task and refuse new ones.
    ///
    /// Pending tasks fail with a transport error once, through their
    /// interceptor and failure handler.
    pub fn invalidate(&self) {
        if self.inner.invalidated.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target: targets::SESSION, pending = self.inner.registry.len(), "session invalidated");
        self.inner.transport.invalidate();
        self.inner.downloads.lock().clear();
        for pending in self.inner.registry.clear() {
            dispatch::settle(
                self,
                pending.handle(),
                pending.into_parts(),
                Some(MessengerError::transport(crate::transport::TransportError::Invalidated)),
            );
        }
    }

    /// Whether [`invalidate`](Self::invalidate) was called.
    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::SeqCst)
    }

    /// The state of a tracked download.
    pub fn download_state(&self, handle: TaskHandle) -> Option<DownloadState> {
        self.inner.downloads.lock().get(&handle).cloned()
    }

    /// Stop tracking a download and return its state.
    pub fn forget_download(&self, handle: TaskHandle) -> Option<DownloadState> {
        self.inner.downloads.lock().remove(&handle)
    }

    /// Set a default header.
    pub fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner
            .config
            .write()
            .default_headers
            .insert(name.into(), value.into());
    }

    /// Remove a default header.
    pub fn remove_default_header(&self, name: &str) -> Option<String> {
        self.inner.config.write().default_headers.remove(name)
    }

    /// The session's default headers.
    pub fn default_headers(&self) -> Headers {
        self.inner.config.read().default_headers.clone()
    }

    /// Set the body preview policy.
    pub fn set_body_preview(&self, preview: BodyPreview) {
        self.inner.config.write().body_preview = preview;
    }

    /// Handles of all in-flight tasks.
    pub fn pending_tasks(&self) -> Vec<TaskHandle> {
        self.inner.registry.handles()
    }

    /// Whether a task is still in flight.
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.inner.registry.contains(handle)
    }

    fn download_bundle(deserializer: Arc<dyn DownloadDeserializer>, handlers: Handlers) -> CallbackBundle {
        let mut bundle = handlers.into_bundle(deserializer.clone());
        bundle.download = Some(deserializer);
        bundle
    }

    fn dispatch(
        &self,
        request: Arc<RequestDescriptor>,
        callbacks: CallbackBundle,
        start: impl FnOnce(&dyn Transport, TaskHandle),
    ) -> Result<TaskHandle> {
        if self.is_invalidated() {
            return Err(MessengerError::transport(crate::transport::TransportError::Invalidated));
        }

        let handle = TaskHandle::next();
        if let Some(ref download) = callbacks.download {
            self.inner
                .downloads
                .lock()
                .insert(handle, DownloadState::new(handle, download.as_ref()));
        }
        self.inner.registry.register(handle, request.clone(), callbacks);

        let preview = self.inner.config.read().body_preview;
        trace::request_dispatched(handle, &request, preview);
        start(self.inner.transport.as_ref(), handle);
        Ok(handle)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.inner.registry.len())
            .field("downloads", &self.inner.downloads.lock().len())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
