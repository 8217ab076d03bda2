//! Task registry.
//!
//! Maps each in-flight [`TaskHandle`] to its [`PendingRequest`]: the
//! originating request, the callbacks registered for it, and the state
//! accumulated from transport events. All access is serialized by a single
//! mutex; callbacks are never invoked while it is held.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::codec::ResponseDeserializer;
use crate::download::DownloadDeserializer;
use crate::error::Result;
use crate::http::{RequestDescriptor, ResponseHead};
use crate::session::{FailureHandler, Interceptor, ProgressHandler, SuccessHandler};
use crate::trace::targets;

/// Opaque identifier of a unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the handle.
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Callbacks registered for a task.
#[derive(Clone)]
pub struct CallbackBundle {
    /// Decodes the final payload.
    pub deserializer: Arc<dyn ResponseDeserializer>,
    /// Saves finished downloads. Present only for download tasks.
    pub download: Option<Arc<dyn DownloadDeserializer>>,
    /// Upload progress.
    pub request_progress: Option<ProgressHandler>,
    /// Response or download progress.
    pub response_progress: Option<ProgressHandler>,
    /// Outcome override hook.
    pub interceptor: Option<Interceptor>,
    /// Called once on success.
    pub success: Option<SuccessHandler>,
    /// Called once on failure.
    pub failure: Option<FailureHandler>,
}

impl CallbackBundle {
    /// A bundle with only a deserializer.
    pub fn new(deserializer: Arc<dyn ResponseDeserializer>) -> Self {
        Self {
            deserializer,
            download: None,
            request_progress: None,
            response_progress: None,
            interceptor: None,
            success: None,
            failure: None,
        }
    }
}

impl std::fmt::Debug for CallbackBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBundle")
            .field("download", &self.download.is_some())
            .field("request_progress", &self.request_progress.is_some())
            .field("response_progress", &self.response_progress.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .field("success", &self.success.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

/// State of one in-flight task.
#[derive(Debug)]
pub struct PendingRequest {
    handle: TaskHandle,
    request: Arc<RequestDescriptor>,
    buffer: BytesMut,
    callbacks: CallbackBundle,
    response: Option<ResponseHead>,
    save_claimed: bool,
    saved: Option<Result<PathBuf>>,
}

impl PendingRequest {
    fn new(handle: TaskHandle, request: Arc<RequestDescriptor>, callbacks: CallbackBundle) -> Self {
        Self {
            handle,
            request,
            buffer: BytesMut::new(),
            callbacks,
            response: None,
            save_claimed: false,
            saved: None,
        }
    }

    /// The task handle.
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// The originating request.
    pub fn request(&self) -> &Arc<RequestDescriptor> {
        &self.request
    }

    /// Registered callbacks.
    pub fn callbacks(&self) -> &CallbackBundle {
        &self.callbacks
    }

    /// Response head, once received.
    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    /// Number of body bytes accumulated so far.
    pub fn received(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Outcome of the download save step, if it ran.
    pub fn saved(&self) -> Option<&Result<PathBuf>> {
        self.saved.as_ref()
    }

    /// Split the finished entry into its parts.
    pub(crate) fn into_parts(self) -> FinishedRequest {
        FinishedRequest {
            request: self.request,
            body: (!self.buffer.is_empty()).then(|| self.buffer.freeze()),
            callbacks: self.callbacks,
            response: self.response,
            saved: self.saved,
        }
    }
}

/// Progress-time view of an entry.
pub(crate) struct TaskView {
    pub(crate) request: Arc<RequestDescriptor>,
    pub(crate) callbacks: CallbackBundle,
    pub(crate) expected: Option<u64>,
}

/// Owned parts of a removed entry.
pub(crate) struct FinishedRequest {
    pub(crate) request: Arc<RequestDescriptor>,
    pub(crate) body: Option<Bytes>,
    pub(crate) callbacks: CallbackBundle,
    pub(crate) response: Option<ResponseHead>,
    pub(crate) saved: Option<Result<PathBuf>>,
}

/// Mutex-guarded map from task handle to pending request.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskHandle, PendingRequest>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a handle with a request and its callbacks.
    ///
    /// Re-registering a handle replaces the previous entry.
    pub fn register(
        &self,
        handle: TaskHandle,
        request: Arc<RequestDescriptor>,
        callbacks: CallbackBundle,
    ) {
        let previous = self
            .tasks
            .lock()
            .insert(handle, PendingRequest::new(handle, request, callbacks));
        if previous.is_some() {
            tracing::warn!(target: targets::REGISTRY, %handle, "task re-registered, previous callbacks replaced");
        }
    }

    /// Record the response head of a task. Returns `false` for unknown handles.
    pub fn set_response(&self, handle: TaskHandle, response: ResponseHead) -> bool {
        match self.tasks.lock().get_mut(&handle) {
            Some(pending) => {
                pending.response = Some(response);
                true
            }
            None => false,
        }
    }

    /// Append a body chunk and return the new total, or `None` for unknown handles.
    pub fn append_data(&self, handle: TaskHandle, chunk: &[u8]) -> Option<u64> {
        let mut tasks = self.tasks.lock();
        let pending = tasks.get_mut(&handle)?;
        pending.buffer.extend_from_slice(chunk);
        Some(pending.buffer.len() as u64)
    }

    /// Record the outcome of saving a finished download.
    ///
    /// Only the first outcome is kept; returns `false` if one was already
    /// recorded or the handle is unknown.
    pub fn record_saved(&self, handle: TaskHandle, saved: Result<PathBuf>) -> bool {
        match self.tasks.lock().get_mut(&handle) {
            Some(pending) if pending.saved.is_none() => {
                pending.saved = Some(saved);
                true
            }
            _ => false,
        }
    }

    /// Remove a task. Removing an unknown handle is a no-op.
    pub fn remove(&self, handle: TaskHandle) -> Option<PendingRequest> {
        self.tasks.lock().remove(&handle)
    }

    /// The callbacks registered for a handle.
    pub fn lookup(&self, handle: TaskHandle) -> Option<CallbackBundle> {
        self.tasks
            .lock()
            .get(&handle)
            .map(|pending| pending.callbacks.clone())
    }

    /// Snapshot of what progress reporting needs for a handle.
    pub(crate) fn view(&self, handle: TaskHandle) -> Option<TaskView> {
        self.tasks.lock().get(&handle).map(|pending| TaskView {
            request: pending.request.clone(),
            callbacks: pending.callbacks.clone(),
            expected: pending.response.as_ref().and_then(|r| r.expected_length),
        })
    }

    /// Claim the save step of a download.
    ///
    /// Returns the download deserializer the first time it is called for a
    /// download task, `None` afterwards or for other tasks.
    pub(crate) fn claim_save(&self, handle: TaskHandle) -> Option<Arc<dyn DownloadDeserializer>> {
        let mut tasks = self.tasks.lock();
        let pending = tasks.get_mut(&handle)?;
        if pending.save_claimed {
            return None;
        }
        let download = pending.callbacks.download.clone()?;
        pending.save_claimed = true;
        Some(download)
    }

    /// Whether a handle is registered.
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.tasks.lock().contains_key(&handle)
    }

    /// All registered handles.
    pub fn handles(&self) -> Vec<TaskHandle> {
        self.tasks.lock().keys().copied().collect()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Remove every task.
    pub fn clear(&self) -> Vec<PendingRequest> {
        self.tasks.lock().drain().map(|(_, pending)| pending).collect()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}
