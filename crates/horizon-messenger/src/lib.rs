//! Asynchronous HTTP messaging core.
//!
//! This crate issues requests, uploads and resumable downloads over a
//! pluggable transport and dispatches each outcome exactly once:
//!
//! - **Codecs**: request serializers and response deserializers as trait
//!   objects, with JSON, text, raw and URL-encoded implementations
//! - **Task registry**: every in-flight task keyed by its [`TaskHandle`]
//! - **Interception**: one hook per task that may keep, clear or replace the
//!   reported error before the success or failure handler runs
//! - **Downloads**: streamed to a temporary file, saved exactly once, and
//!   resumable after cancellation
//! - **Trust**: TLS and HTTP authentication challenges routed to a
//!   swappable delegate
//!
//! # Requests
//!
//! ```ignore
//! use horizon_messenger::{HttpMethod, Parameters, Session, UrlEncodedSerializer};
//!
//! let session = Session::new();
//!
//! let handle = session
//!     .request("https://api.example.com/search", HttpMethod::Get)
//!     .serializer(UrlEncodedSerializer::new())
//!     .parameters(Parameters::pairs([("q", "rust")]))
//!     .on_success(|_, _, response, decoded| {
//!         println!("{:?} {:?}", response.map(|r| r.status), decoded);
//!     })
//!     .on_failure(|_, _, _, err| eprintln!("search failed: {err}"))
//!     .send()?;
//! ```
//!
//! # Downloads
//!
//! ```ignore
//! use horizon_messenger::{FileDownloadDeserializer, Handlers, Session};
//!
//! let target = Arc::new(FileDownloadDeserializer::new("/tmp/archive.zip"));
//! let handle = session.download("https://example.com/archive.zip", target.clone()).send()?;
//!
//! // Later: pause, then pick up where it stopped.
//! session.cancel(handle);
//! if let Some(state) = session.download_state(handle) {
//!     session.resume(&state, target, Handlers::default())?;
//! }
//! ```
//!
//! # Interception
//!
//! ```ignore
//! session
//!     .request("https://api.example.com/items", HttpMethod::Get)
//!     .intercept(|ctx| match ctx.response {
//!         Some(response) if response.header("X-Maintenance").is_some() => {
//!             Intercept::Replace(MessengerError::Unknown)
//!         }
//!         _ => Intercept::Keep,
//!     })
//!     .send()?;
//! ```

pub mod codec;
pub mod download;
mod error;
pub mod http;
pub mod model;
pub mod registry;
pub mod session;
pub mod trace;
pub mod transport;
pub mod trust;

pub use error::{Cause, MessengerError, Result};

pub use codec::{
    DataDeserializer, DataSerializer, Decoded, JsonDeserializer, JsonSerializer, Parameters,
    RequestSerializer, ResponseDeserializer, TextDeserializer, TextSerializer, UrlEncodedSerializer,
};
pub use download::{DownloadDeserializer, DownloadState, FileDownloadDeserializer, ResumeToken, WriteOptions};
pub use http::{
    CachePolicy, Headers, HttpMethod, RawData, RequestBuilder, RequestDescriptor, ResponseDescriptor,
    TransferProgress,
};
pub use registry::TaskHandle;
pub use session::{Handlers, Intercept, Interception, Session, SessionBuilder, SessionConfig};
pub use trace::BodyPreview;
pub use transport::{ReqwestTransport, Transport, TransportError, TransportEvents};
pub use trust::{AuthChallenge, ChallengeDisposition, Credential, TrustDelegate};
