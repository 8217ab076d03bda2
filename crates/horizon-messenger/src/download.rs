//! Download persistence and resume state.
//!
//! A download writes into a temporary file owned by the transport. On
//! success the task's [`DownloadDeserializer`] moves the bytes to their
//! final location exactly once. Cancelling a download that the transport
//! can continue yields a [`ResumeToken`], stored on the task's
//! [`DownloadState`]; [`Session::resume`](crate::Session::resume) restarts
//! the transfer from it.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::codec::{Decoded, ResponseDeserializer};
use crate::error::{MessengerError, Result};
use crate::http::RequestDescriptor;
use crate::registry::TaskHandle;

/// How a finished download is written to its save location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write to a sibling temporary file and rename it into place.
    pub atomic: bool,
    /// Fail instead of replacing an existing file.
    pub without_overwriting: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            without_overwriting: false,
        }
    }
}

/// A deserializer that persists downloaded files.
pub trait DownloadDeserializer: ResponseDeserializer {
    /// Final location of the downloaded file.
    fn save_location(&self) -> &Path;

    /// Write options used by [`save`](Self::save).
    fn write_options(&self) -> WriteOptions {
        WriteOptions::default()
    }

    /// Move the temporary download to the save location.
    fn save(&self, temporary: &Path) -> Result<PathBuf>;
}

/// Saves downloads to a fixed path.
#[derive(Clone, Debug)]
pub struct FileDownloadDeserializer {
    save_location: PathBuf,
    write_options: WriteOptions,
    accepted: Vec<String>,
}

impl FileDownloadDeserializer {
    /// Save downloads to `save_location` with default write options.
    pub fn new(save_location: impl Into<PathBuf>) -> Self {
        Self {
            save_location: save_location.into(),
            write_options: WriteOptions::default(),
            accepted: vec!["*/*".to_string()],
        }
    }

    /// Set the write options.
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }

    /// Override the accepted content types.
    pub fn with_accepted(mut self, accepted: Vec<String>) -> Self {
        self.accepted = accepted;
        self
    }
}

impl ResponseDeserializer for FileDownloadDeserializer {
    fn accepted_content_types(&self) -> &[String] {
        &self.accepted
    }

    fn decode(&self, body: &Bytes) -> Result<Decoded> {
        Ok(Decoded::Bytes(body.clone()))
    }
}

impl DownloadDeserializer for FileDownloadDeserializer {
    fn save_location(&self) -> &Path {
        &self.save_location
    }

    fn write_options(&self) -> WriteOptions {
        self.write_options
    }

    fn save(&self, temporary: &Path) -> Result<PathBuf> {
        save_file(temporary, &self.save_location, self.write_options)
            .map_err(MessengerError::transport)?;
        Ok(self.save_location.clone())
    }
}

fn save_file(temporary: &Path, destination: &Path, options: WriteOptions) -> io::Result<()> {
    if options.without_overwriting && destination.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        ));
    }
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    if !options.atomic {
        fs::copy(temporary, destination)?;
        return Ok(());
    }

    let mut staged = NamedTempFile::new_in(parent)?;
    io::copy(&mut File::open(temporary)?, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    if options.without_overwriting {
        staged.persist_noclobber(destination).map_err(|e| e.error)?;
    } else {
        staged.persist(destination).map_err(|e| e.error)?;
    }
    Ok(())
}

/// Opaque continuation data for a cancelled download.
///
/// Carries the originating request so a resumed task reports the request it
/// actually continues. A token resumes at most once; clones share that
/// state. A token rebuilt with [`ResumeToken::new`] from persisted data
/// starts unused.
#[derive(Clone, Debug)]
pub struct ResumeToken {
    request: Arc<RequestDescriptor>,
    data: Bytes,
    used: Arc<AtomicBool>,
}

impl ResumeToken {
    /// Create a token. The data is transport specific.
    pub fn new(request: Arc<RequestDescriptor>, data: Bytes) -> Self {
        Self {
            request,
            data,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The request being continued.
    pub fn request(&self) -> &Arc<RequestDescriptor> {
        &self.request
    }

    /// Transport-specific continuation data.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether a download was already resumed from this token.
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    /// Mark the token used. Returns `false` if it already was.
    pub(crate) fn claim(&self) -> bool {
        !self.used.swap(true, Ordering::SeqCst)
    }

    /// Undo [`claim`](Self::claim) after a resume that never started.
    pub(crate) fn release(&self) {
        self.used.store(false, Ordering::SeqCst);
    }

    /// Whether both tokens come from the same cancellation.
    pub(crate) fn same_as(&self, other: &ResumeToken) -> bool {
        Arc::ptr_eq(&self.used, &other.used)
    }
}

/// Per-download bookkeeping kept by the session.
#[derive(Clone, Debug)]
pub struct DownloadState {
    handle: TaskHandle,
    save_location: PathBuf,
    write_options: WriteOptions,
    resume_token: Option<ResumeToken>,
}

impl DownloadState {
    pub(crate) fn new(handle: TaskHandle, deserializer: &dyn DownloadDeserializer) -> Self {
        Self {
            handle,
            save_location: deserializer.save_location().to_path_buf(),
            write_options: deserializer.write_options(),
            resume_token: None,
        }
    }

    pub(crate) fn set_resume_token(&mut self, token: Option<ResumeToken>) {
        self.resume_token = token;
    }

    /// The task this state belongs to.
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Final location of the file.
    pub fn save_location(&self) -> &Path {
        &self.save_location
    }

    /// Write options of the download.
    pub fn write_options(&self) -> WriteOptions {
        self.write_options
    }

    /// Resume token captured when the download was cancelled.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        self.resume_token.as_ref()
    }
}
