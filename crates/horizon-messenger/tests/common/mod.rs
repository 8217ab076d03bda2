//! Shared fixtures for session tests.
//!
//! `ScriptedTransport` records what the session starts and lets each test
//! play back transport events by hand.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use horizon_messenger::http::ResponseHead;
use horizon_messenger::{
    DownloadDeserializer, MessengerError, RequestDescriptor, ResponseDeserializer, ResumeToken,
    TaskHandle, Transport, TransportError, TransportEvents, WriteOptions,
};
use horizon_messenger::codec::Decoded;
use tempfile::TempDir;

/// What the session asked the transport to do.
#[derive(Clone, Debug)]
pub enum Started {
    Data(TaskHandle, Arc<RequestDescriptor>),
    Upload(TaskHandle, Arc<RequestDescriptor>),
    Download(TaskHandle, Arc<RequestDescriptor>),
    Resume(TaskHandle, ResumeToken),
}

impl Started {
    pub fn handle(&self) -> TaskHandle {
        match self {
            Self::Data(h, _) | Self::Upload(h, _) | Self::Download(h, _) | Self::Resume(h, _) => *h,
        }
    }

    pub fn request(&self) -> Arc<RequestDescriptor> {
        match self {
            Self::Data(_, r) | Self::Upload(_, r) | Self::Download(_, r) => r.clone(),
            Self::Resume(_, token) => token.request().clone(),
        }
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    events: Mutex<Option<TransportEvents>>,
    started: Mutex<Vec<Started>>,
    files: Mutex<HashMap<TaskHandle, PathBuf>>,
    cancelled: Mutex<Vec<TaskHandle>>,
    invalidated: Mutex<bool>,
    dir: Mutex<Option<TempDir>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let transport = Self::default();
        *transport.dir.lock().unwrap() = Some(tempfile::tempdir().unwrap());
        Arc::new(transport)
    }

    pub fn events(&self) -> TransportEvents {
        self.events.lock().unwrap().clone().expect("transport not attached")
    }

    pub fn started(&self) -> Vec<Started> {
        self.started.lock().unwrap().clone()
    }

    pub fn last_started(&self) -> Started {
        self.started().pop().expect("nothing started")
    }

    pub fn cancelled(&self) -> Vec<TaskHandle> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn is_invalidated(&self) -> bool {
        *self.invalidated.lock().unwrap()
    }

    /// Deliver a complete response: head, body, completion.
    pub fn respond(&self, handle: TaskHandle, status: u16, headers: &[(&str, &str)], body: &[u8]) {
        let events = self.events();
        let mut head = ResponseHead::new(status);
        for (name, value) in headers {
            head = head.with_header(*name, *value);
        }
        head.expected_length = Some(body.len() as u64);
        events.did_receive_response(handle, head);
        if !body.is_empty() {
            events.did_receive_data(handle, body);
        }
        events.did_complete(handle, None);
    }

    pub fn fail(&self, handle: TaskHandle, error: TransportError) {
        self.events().did_complete(handle, Some(error));
    }

    /// Path of the in-progress download file of a task.
    pub fn download_file(&self, handle: TaskHandle) -> Option<PathBuf> {
        self.files.lock().unwrap().get(&handle).cloned()
    }

    /// Append bytes to a download and report the write.
    pub fn write(&self, handle: TaskHandle, bytes: &[u8], expected: Option<u64>) {
        let path = self.download_file(handle).expect("not a download");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(bytes).unwrap();
        let total = fs::metadata(&path).unwrap().len();
        self.events()
            .did_write_data(handle, bytes.len() as u64, total, expected);
    }

    /// Deliver the head of a download response.
    pub fn download_head(&self, handle: TaskHandle, status: u16, expected: Option<u64>) {
        let mut head = ResponseHead::new(status);
        head.expected_length = expected;
        self.events().did_receive_response(handle, head);
    }

    /// Hand the finished file to the session and complete the task.
    pub fn finish_download(&self, handle: TaskHandle) {
        let path = self.files.lock().unwrap().remove(&handle).expect("not a download");
        let events = self.events();
        events.did_finish_downloading(handle, &path);
        events.did_complete(handle, None);
        let _ = fs::remove_file(path);
    }

    fn new_file(&self, handle: TaskHandle) -> PathBuf {
        let dir = self.dir.lock().unwrap();
        let path = dir.as_ref().unwrap().path().join(format!("{}.part", handle.id()));
        fs::write(&path, b"").unwrap();
        path
    }
}

impl Transport for ScriptedTransport {
    fn attach(&self, events: TransportEvents) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn start_data(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        self.started.lock().unwrap().push(Started::Data(handle, request));
    }

    fn start_upload(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        self.started.lock().unwrap().push(Started::Upload(handle, request));
    }

    fn start_download(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        let path = self.new_file(handle);
        self.files.lock().unwrap().insert(handle, path);
        self.started.lock().unwrap().push(Started::Download(handle, request));
    }

    fn resume_download(&self, handle: TaskHandle, token: ResumeToken) {
        let path = PathBuf::from(String::from_utf8(token.data().to_vec()).unwrap());
        self.files.lock().unwrap().insert(handle, path);
        self.started.lock().unwrap().push(Started::Resume(handle, token));
    }

    /// Downloads yield a token naming their partial file.
    fn resume_token(&self, handle: TaskHandle) -> Option<ResumeToken> {
        let request = self
            .started()
            .into_iter()
            .find(|s| s.handle() == handle)
            .map(|s| s.request())?;
        let files = self.files.lock().unwrap();
        let path = files.get(&handle)?;
        Some(ResumeToken::new(request, Bytes::from(path.to_string_lossy().into_owned())))
    }

    /// Started tasks complete synchronously with `Cancelled`.
    fn cancel(&self, handle: TaskHandle) {
        self.cancelled.lock().unwrap().push(handle);
        if !self.started().iter().any(|s| s.handle() == handle) {
            return;
        }
        self.files.lock().unwrap().remove(&handle);
        self.fail(handle, TransportError::Cancelled);
    }

    fn invalidate(&self) {
        *self.invalidated.lock().unwrap() = true;
    }
}

/// Download deserializer that counts saves.
pub struct CountingDownload {
    inner: horizon_messenger::FileDownloadDeserializer,
    pub saves: Mutex<usize>,
}

impl CountingDownload {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_options(path, WriteOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: WriteOptions) -> Arc<Self> {
        Arc::new(Self {
            inner: horizon_messenger::FileDownloadDeserializer::new(path).with_write_options(options),
            saves: Mutex::new(0),
        })
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl ResponseDeserializer for CountingDownload {
    fn accepted_content_types(&self) -> &[String] {
        self.inner.accepted_content_types()
    }

    fn decode(&self, body: &Bytes) -> Result<Decoded, MessengerError> {
        self.inner.decode(body)
    }
}

impl DownloadDeserializer for CountingDownload {
    fn save_location(&self) -> &Path {
        self.inner.save_location()
    }

    fn write_options(&self) -> WriteOptions {
        self.inner.write_options()
    }

    fn save(&self, temporary: &Path) -> Result<PathBuf, MessengerError> {
        *self.saves.lock().unwrap() += 1;
        self.inner.save(temporary)
    }
}

/// Collects handler invocations.
#[derive(Default)]
pub struct Outcomes {
    pub successes: Mutex<Vec<(Option<u16>, Option<Decoded>)>>,
    pub failures: Mutex<Vec<(Option<u16>, MessengerError)>>,
}

impl Outcomes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handlers(self: &Arc<Self>) -> horizon_messenger::Handlers {
        let on_success = self.clone();
        let on_failure = self.clone();
        horizon_messenger::Handlers::default()
            .on_success(move |_, _, response, decoded| {
                on_success
                    .successes
                    .lock()
                    .unwrap()
                    .push((response.map(|r| r.status), decoded));
            })
            .on_failure(move |_, _, response, err| {
                on_failure
                    .failures
                    .lock()
                    .unwrap()
                    .push((response.map(|r| r.status), err));
            })
    }

    pub fn success_count(&self) -> usize {
        self.successes.lock().unwrap().len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn single_success(&self) -> Option<Decoded> {
        let successes = self.successes.lock().unwrap();
        assert_eq!(successes.len(), 1, "expected exactly one success");
        assert_eq!(self.failure_count(), 0, "unexpected failure");
        successes[0].1.clone()
    }

    pub fn single_failure(&self) -> MessengerError {
        let failures = self.failures.lock().unwrap();
        assert_eq!(failures.len(), 1, "expected exactly one failure");
        assert_eq!(self.success_count(), 0, "unexpected success");
        failures[0].1.clone()
    }
}
