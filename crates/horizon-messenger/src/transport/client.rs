//! Transport built on `reqwest`.
//!
//! Each task runs on the tokio runtime and races its request against a
//! cancellation signal. Downloads stream into a temporary file; cancelling
//! one hands back a [`ResumeToken`] that continues from the bytes already
//! written, using `Range`/`If-Range` on the next request.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{
    CACHE_CONTROL, CONTENT_LENGTH, ETAG, IF_RANGE, LAST_MODIFIED, RANGE, WWW_AUTHENTICATE,
};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::tls::{self, EventsSlot, TlsVersion};
use super::{Transport, TransportError, TransportEvents, runtime};
use crate::download::ResumeToken;
use crate::error::MessengerError;
use crate::http::{CachePolicy, Headers, RequestDescriptor, ResponseHead};
use crate::registry::TaskHandle;
use crate::trace::targets;
use crate::trust::{
    AuthChallenge, AuthenticationMethod, ChallengeDisposition, Credential, ProtectionSpace,
};

/// Upload bodies are streamed in chunks of this size.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum number of credential retries for one task.
const MAX_CHALLENGE_ROUNDS: u32 = 3;

/// Configuration for the reqwest transport.
#[derive(Clone, Debug)]
pub struct ReqwestConfig {
    /// Client-wide request timeout. Per-request timeouts take precedence.
    pub timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Whether to keep a cookie store.
    pub cookies_enabled: bool,
    /// User agent sent with every request.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// Minimum TLS version.
    pub min_tls_version: TlsVersion,
    /// Directory for in-progress downloads. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ReqwestConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(10)),
            follow_redirects: true,
            max_redirects: 10,
            cookies_enabled: true,
            user_agent: Some(format!("HorizonMessenger/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            proxy: None,
            min_tls_version: TlsVersion::default(),
            temp_dir: None,
        }
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Default)]
pub struct ReqwestTransportBuilder {
    config: ReqwestConfig,
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client-wide request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Disable the client-wide request timeout.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Disable redirect following.
    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Enable or disable the cookie store.
    pub fn cookies(mut self, enabled: bool) -> Self {
        self.config.cookies_enabled = enabled;
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Send no user agent.
    pub fn no_user_agent(mut self) -> Self {
        self.config.user_agent = None;
        self
    }

    /// Set a proxy URL.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy_url.into());
        self
    }

    /// Set the minimum TLS version.
    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.config.min_tls_version = version;
        self
    }

    /// Directory for in-progress downloads.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<ReqwestTransport, MessengerError> {
        let events = EventsSlot::default();
        let tls = tls::client_config(self.config.min_tls_version, events.clone())?;

        let mut builder = reqwest::Client::builder().use_preconfigured_tls(tls);

        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        if self.config.follow_redirects {
            builder = builder.redirect(Policy::limited(self.config.max_redirects));
        } else {
            builder = builder.redirect(Policy::none());
        }

        if self.config.cookies_enabled {
            builder = builder.cookie_store(true);
        }

        if let Some(ref proxy_url) = self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(TransportError::from)?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(TransportError::from)?;

        Ok(ReqwestTransport {
            inner: Arc::new(Inner {
                client,
                config: self.config,
                events,
                tasks: Mutex::new(HashMap::new()),
                invalidated: AtomicBool::new(false),
            }),
        })
    }
}

/// Continuation data carried in a [`ResumeToken`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResumeData {
    pub(crate) path: PathBuf,
    pub(crate) offset: u64,
    pub(crate) etag: Option<String>,
    pub(crate) last_modified: Option<String>,
}

impl ResumeData {
    fn encode(&self) -> Result<Bytes, TransportError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| TransportError::InvalidResumeData(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(|e| TransportError::InvalidResumeData(e.to_string()))
    }

    /// `If-Range` validator, strong entity tag preferred.
    fn validator(&self) -> Option<&str> {
        self.etag.as_deref().or(self.last_modified.as_deref())
    }
}

/// Live state of a download, shared between the task and `cancel`.
#[derive(Debug)]
struct DownloadProgress {
    resume: ResumeData,
    cancelled: bool,
    finished: bool,
}

enum TaskKind {
    Data,
    Upload,
    Download(Option<ResumeData>),
}

struct RunningTask {
    cancel_tx: Option<oneshot::Sender<()>>,
    request: Arc<RequestDescriptor>,
    download: Option<Arc<Mutex<DownloadProgress>>>,
}

struct Inner {
    client: reqwest::Client,
    config: ReqwestConfig,
    events: EventsSlot,
    tasks: Mutex<HashMap<TaskHandle, RunningTask>>,
    invalidated: AtomicBool,
}

/// [`Transport`] implementation on top of `reqwest`.
///
/// Cheap to clone; clones share the connection pool and running tasks.
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<Inner>,
}

impl ReqwestTransport {
    /// Create a transport with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    pub fn new() -> Self {
        ReqwestTransportBuilder::new()
            .build()
            .expect("Failed to create HTTP transport with default configuration")
    }

    /// Create a builder for configuring a transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    /// The transport configuration.
    pub fn config(&self) -> &ReqwestConfig {
        &self.inner.config
    }

    /// Number of tasks currently running.
    pub fn running_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    fn start(&self, handle: TaskHandle, request: Arc<RequestDescriptor>, kind: TaskKind) {
        let Some(events) = self.inner.events.read().clone() else {
            tracing::warn!(target: targets::TRANSPORT, %handle, "transport used before attach, task dropped");
            return;
        };
        if self.inner.invalidated.load(Ordering::SeqCst) {
            events.did_complete(handle, Some(TransportError::Invalidated));
            return;
        }

        let download = match &kind {
            TaskKind::Download(resume) => match self.inner.prepare_download(resume.clone()) {
                Ok(progress) => Some(Arc::new(Mutex::new(progress))),
                Err(err) => {
                    events.did_complete(handle, Some(err));
                    return;
                }
            },
            _ => None,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.inner.tasks.lock().insert(
            handle,
            RunningTask {
                cancel_tx: Some(cancel_tx),
                request: request.clone(),
                download: download.clone(),
            },
        );

        let inner = self.inner.clone();
        runtime::spawn(async move {
            let result = tokio::select! {
                result = inner.execute(&events, handle, &request, &kind, download.as_deref()) => result,
                _ = cancel_rx => Err(TransportError::Cancelled),
            };

            inner.tasks.lock().remove(&handle);
            if let Some(progress) = download {
                let progress = progress.lock();
                let resumable = progress.cancelled && !progress.finished;
                if !resumable && let Err(err) = fs::remove_file(&progress.resume.path) {
                    tracing::debug!(
                        target: targets::TRANSPORT,
                        %handle,
                        path = %progress.resume.path.display(),
                        error = %err,
                        "failed to remove download file"
                    );
                }
            }

            if let Err(ref err) = result {
                tracing::debug!(target: targets::TRANSPORT, %handle, error = %err, "task failed");
            }
            events.did_complete(handle, result.err());
        });
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn prepare_download(&self, resume: Option<ResumeData>) -> Result<DownloadProgress, TransportError> {
        if let Some(resume) = resume {
            let written = fs::metadata(&resume.path).map(|m| m.len()).ok();
            if written.is_some_and(|len| len >= resume.offset) {
                return Ok(DownloadProgress {
                    resume,
                    cancelled: false,
                    finished: false,
                });
            }
            tracing::debug!(
                target: targets::TRANSPORT,
                path = %resume.path.display(),
                "resume file missing or short, restarting download"
            );
        }

        let dir = self.config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&dir)?;
        let file = tempfile::Builder::new()
            .prefix("horizon-messenger-")
            .suffix(".download")
            .tempfile_in(&dir)?;
        let (_, path) = file.keep().map_err(|e| TransportError::from(e.error))?;

        Ok(DownloadProgress {
            resume: ResumeData {
                path,
                offset: 0,
                etag: None,
                last_modified: None,
            },
            cancelled: false,
            finished: false,
        })
    }

    async fn execute(
        &self,
        events: &TransportEvents,
        handle: TaskHandle,
        request: &RequestDescriptor,
        kind: &TaskKind,
        download: Option<&Mutex<DownloadProgress>>,
    ) -> Result<(), TransportError> {
        let resume_from = download.map(|progress| progress.lock().resume.clone());

        let mut credential = None;
        let mut failures = 0;
        let mut response = loop {
            let builder = self.prepare(events, handle, request, kind, resume_from.as_ref(), credential.as_ref());
            let response = builder.send().await?;
            if response.status() != StatusCode::UNAUTHORIZED || failures >= MAX_CHALLENGE_ROUNDS {
                break response;
            }
            let Some(challenge) = auth_challenge(&response, request, failures) else {
                break response;
            };
            match events.did_receive_challenge(Some(handle), &challenge) {
                ChallengeDisposition::UseCredential(basic @ Credential::Basic { .. }) => {
                    credential = Some(basic);
                    failures += 1;
                }
                ChallengeDisposition::CancelChallenge => return Err(TransportError::ChallengeCancelled),
                _ => break response,
            }
        };

        match download {
            Some(progress) if response.status().is_success() => {
                self.receive_file(events, handle, response, progress).await
            }
            _ => {
                events.did_receive_response(handle, head(&response, response.content_length()));
                while let Some(chunk) = response.chunk().await? {
                    events.did_receive_data(handle, &chunk);
                }
                Ok(())
            }
        }
    }

    fn prepare(
        &self,
        events: &TransportEvents,
        handle: TaskHandle,
        request: &RequestDescriptor,
        kind: &TaskKind,
        resume: Option<&ResumeData>,
        credential: Option<&Credential>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method().to_reqwest(), request.url().clone())
            .timeout(request.timeout());

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.header(CACHE_CONTROL.as_str()).is_none()
            && let Some(directive) = cache_directive(request.cache_policy())
        {
            builder = builder.header(CACHE_CONTROL, directive);
        }

        match (kind, request.body()) {
            (TaskKind::Upload, body) => {
                let body = body.cloned().unwrap_or_default();
                builder = builder
                    .header(CONTENT_LENGTH, body.len())
                    .body(upload_body(events.clone(), handle, body));
            }
            (_, Some(body)) => builder = builder.body(body.clone()),
            _ => {}
        }

        if let Some(resume) = resume
            && resume.offset > 0
        {
            builder = builder.header(RANGE, format!("bytes={}-", resume.offset));
            if let Some(validator) = resume.validator() {
                builder = builder.header(IF_RANGE, validator);
            }
        }

        if let Some(Credential::Basic { username, password }) = credential {
            builder = builder.basic_auth(username, password.as_deref());
        }

        builder
    }

    async fn receive_file(
        &self,
        events: &TransportEvents,
        handle: TaskHandle,
        mut response: reqwest::Response,
        progress: &Mutex<DownloadProgress>,
    ) -> Result<(), TransportError> {
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let etag = header_value(&response, ETAG.as_str());
        let last_modified = header_value(&response, LAST_MODIFIED.as_str());

        let (path, offset) = {
            let mut progress = progress.lock();
            let resume = &mut progress.resume;
            if !partial {
                resume.offset = 0;
                resume.etag = None;
                resume.last_modified = None;
            }
            resume.etag = etag.or(resume.etag.take());
            resume.last_modified = last_modified.or(resume.last_modified.take());
            (resume.path.clone(), resume.offset)
        };

        let expected = response.content_length().map(|len| len + offset);
        events.did_receive_response(handle, head(&response, expected));

        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;

        while let Some(chunk) = response.chunk().await? {
            let total = {
                let mut progress = progress.lock();
                if progress.cancelled {
                    return Err(TransportError::Cancelled);
                }
                file.write_all(&chunk)?;
                progress.resume.offset += chunk.len() as u64;
                progress.resume.offset
            };
            events.did_write_data(handle, chunk.len() as u64, total, expected);
        }
        file.flush()?;

        {
            let mut progress = progress.lock();
            if progress.cancelled {
                return Err(TransportError::Cancelled);
            }
            progress.finished = true;
        }
        events.did_finish_downloading(handle, &path);
        Ok(())
    }
}

impl Transport for ReqwestTransport {
    fn attach(&self, events: TransportEvents) {
        *self.inner.events.write() = Some(events);
    }

    fn default_headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(ref ua) = self.inner.config.user_agent {
            headers.insert("User-Agent".to_string(), ua.clone());
        }
        headers
    }

    fn start_data(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        self.start(handle, request, TaskKind::Data);
    }

    fn start_upload(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        self.start(handle, request, TaskKind::Upload);
    }

    fn start_download(&self, handle: TaskHandle, request: Arc<RequestDescriptor>) {
        self.start(handle, request, TaskKind::Download(None));
    }

    fn resume_download(&self, handle: TaskHandle, token: ResumeToken) {
        match ResumeData::decode(token.data()) {
            Ok(resume) => self.start(handle, token.request().clone(), TaskKind::Download(Some(resume))),
            Err(err) => {
                if let Some(events) = self.inner.events.read().clone() {
                    events.did_complete(handle, Some(err));
                }
            }
        }
    }

    fn resume_token(&self, handle: TaskHandle) -> Option<ResumeToken> {
        let tasks = self.inner.tasks.lock();
        let task = tasks.get(&handle)?;
        let mut progress = task.download.as_ref()?.lock();
        if progress.finished {
            return None;
        }
        progress.cancelled = true;
        match progress.resume.encode() {
            Ok(data) => Some(ResumeToken::new(task.request.clone(), data)),
            Err(err) => {
                tracing::warn!(target: targets::TRANSPORT, %handle, error = %err, "resume data not produced");
                None
            }
        }
    }

    fn cancel(&self, handle: TaskHandle) {
        let mut tasks = self.inner.tasks.lock();
        if let Some(tx) = tasks.get_mut(&handle).and_then(|task| task.cancel_tx.take()) {
            let _ = tx.send(());
        }
    }

    fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock();
        for task in tasks.values_mut() {
            if let Some(tx) = task.cancel_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.inner.config)
            .field("running_tasks", &self.running_tasks())
            .finish()
    }
}

fn cache_directive(policy: CachePolicy) -> Option<&'static str> {
    match policy {
        CachePolicy::UseProtocolCachePolicy => None,
        CachePolicy::ReloadIgnoringLocalCacheData => Some("no-cache"),
        CachePolicy::ReturnCacheDataElseLoad => Some("max-stale"),
        CachePolicy::ReturnCacheDataDontLoad => Some("only-if-cached"),
    }
}

fn upload_body(events: TransportEvents, handle: TaskHandle, body: Bytes) -> reqwest::Body {
    let total = body.len() as u64;
    let chunks: Vec<Bytes> = (0..body.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| body.slice(start..(start + UPLOAD_CHUNK_SIZE).min(body.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        events.did_send_body_data(handle, chunk.len() as u64, sent, Some(total));
        Ok::<_, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(stream)
}

fn head(response: &reqwest::Response, expected_length: Option<u64>) -> ResponseHead {
    ResponseHead {
        status: response.status().as_u16(),
        url: Some(response.url().clone()),
        headers: response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        expected_length,
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn auth_challenge(
    response: &reqwest::Response,
    request: &RequestDescriptor,
    previous_failure_count: u32,
) -> Option<AuthChallenge> {
    let header = response.headers().get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let url = request.url();
    let proposed_credential = (!url.username().is_empty()).then(|| Credential::Basic {
        username: url.username().to_string(),
        password: url.password().map(str::to_string),
    });
    Some(AuthChallenge {
        protection_space: ProtectionSpace {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default(),
            realm: realm(header),
            method: AuthenticationMethod::from_www_authenticate(header),
        },
        proposed_credential,
        previous_failure_count,
        server_trust: None,
    })
}

fn realm(www_authenticate: &str) -> Option<String> {
    let (_, rest) = www_authenticate.split_once("realm=")?;
    let rest = rest.trim_start_matches('"');
    rest.split(['"', ',']).next().map(str::to_string)
}
