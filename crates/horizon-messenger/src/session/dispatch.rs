//! Transport event routing.
//!
//! [`TransportEvents`] is the only way a transport talks back to its
//! session. It holds a weak reference, so a transport outliving its session
//! reports into the void instead of keeping the session alive.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::sync::atomic::Ordering;

use super::{Intercept, Interception, Session, SessionInner};
use crate::error::MessengerError;
use crate::http::{RawData, ResponseDescriptor, ResponseHead, TransferProgress, decode_response};
use crate::registry::{FinishedRequest, TaskHandle};
use crate::trace::{self, targets};
use crate::transport::TransportError;
use crate::trust::{AuthChallenge, ChallengeDisposition};

/// Event sink handed to a [`Transport`](crate::transport::Transport).
#[derive(Clone)]
pub struct TransportEvents {
    session: Weak<SessionInner>,
}

impl TransportEvents {
    pub(crate) fn new(session: Weak<SessionInner>) -> Self {
        Self { session }
    }

    fn session(&self) -> Option<Session> {
        self.session.upgrade().map(Session::from_inner)
    }

    /// Report upload progress.
    pub fn did_send_body_data(&self, handle: TaskHandle, chunk: u64, total_sent: u64, expected: Option<u64>) {
        let Some(session) = self.session() else { return };
        let Some(view) = session.inner.registry.view(handle) else { return };
        if let Some(ref progress) = view.callbacks.request_progress {
            progress(
                &session,
                &view.request,
                TransferProgress {
                    chunk,
                    transferred: total_sent,
                    expected,
                },
            );
        }
    }

    /// Report the response head.
    pub fn did_receive_response(&self, handle: TaskHandle, response: ResponseHead) {
        let Some(session) = self.session() else { return };
        trace::response_received(handle, &response);
        if !session.inner.registry.set_response(handle, response) {
            tracing::debug!(target: targets::SESSION, %handle, "response for unknown task ignored");
        }
    }

    /// Report a chunk of response body.
    pub fn did_receive_data(&self, handle: TaskHandle, chunk: &[u8]) {
        let Some(session) = self.session() else { return };
        let Some(total) = session.inner.registry.append_data(handle, chunk) else {
            tracing::debug!(target: targets::SESSION, %handle, "data for unknown task ignored");
            return;
        };
        self.response_progress(&session, handle, chunk.len() as u64, total, None);
    }

    /// Report bytes written to a download file.
    pub fn did_write_data(&self, handle: TaskHandle, chunk: u64, total_written: u64, expected: Option<u64>) {
        let Some(session) = self.session() else { return };
        self.response_progress(&session, handle, chunk, total_written, expected);
    }

    /// Report a finished download file. The file is saved to its final
    /// location before this returns; the transport may delete it afterwards.
    pub fn did_finish_downloading(&self, handle: TaskHandle, location: &Path) {
        let Some(session) = self.session() else { return };
        let Some(download) = session.inner.registry.claim_save(handle) else {
            tracing::debug!(target: targets::SESSION, %handle, "download already saved or unknown");
            return;
        };
        let saved = download.save(location);
        if let Err(ref err) = saved {
            tracing::warn!(target: targets::SESSION, %handle, error = %err, "failed to save download");
        }
        session.inner.registry.record_saved(handle, saved);
    }

    /// Report the terminal event of a task.
    ///
    /// Exactly one call per task is dispatched; later calls for the same
    /// handle are dropped.
    pub fn did_complete(&self, handle: TaskHandle, error: Option<TransportError>) {
        let Some(session) = self.session() else { return };
        let Some(pending) = session.inner.registry.remove(handle) else {
            if session.inner.invalidated.load(Ordering::SeqCst) {
                tracing::debug!(target: targets::SESSION, %handle, "completion after invalidation dropped");
            } else {
                tracing::warn!(target: targets::SESSION, %handle, "completion for unknown task dropped");
            }
            return;
        };

        // A cancelled download keeps its state; `Session::cancel` fills in
        // the token or drops the state.
        if !matches!(error, Some(TransportError::Cancelled)) {
            session.inner.downloads.lock().remove(&handle);
        }

        settle(&session, handle, pending.into_parts(), error.map(MessengerError::from));
    }

    /// Route a challenge to the trust delegate.
    ///
    /// `task` is `None` for connection-level challenges.
    pub fn did_receive_challenge(&self, task: Option<TaskHandle>, challenge: &AuthChallenge) -> ChallengeDisposition {
        match self.session.upgrade() {
            Some(inner) => inner.trust.resolve(task, challenge),
            None => challenge.default_disposition(),
        }
    }

    fn response_progress(&self, session: &Session, handle: TaskHandle, chunk: u64, total: u64, expected: Option<u64>) {
        let Some(view) = session.inner.registry.view(handle) else { return };
        if let Some(ref progress) = view.callbacks.response_progress {
            progress(
                session,
                &view.request,
                TransferProgress {
                    chunk,
                    transferred: total,
                    expected: expected.or(view.expected),
                },
            );
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("attached", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Run the terminal pipeline for a task already removed from the registry:
/// interceptor, decoder, then exactly one of the success or failure handler.
pub(super) fn settle(
    session: &Session,
    handle: TaskHandle,
    finished: FinishedRequest,
    error: Option<MessengerError>,
) {
    let FinishedRequest {
        request,
        body,
        callbacks,
        response: head,
        saved,
    } = finished;

    let (payload, error) = match saved {
        Some(Ok(path)) => (Some(RawData::File(path)), error),
        Some(Err(save_error)) => (None, Some(save_error)),
        None => (body.clone().map(RawData::Bytes), error),
    };
    let response = head
        .as_ref()
        .map(|head| ResponseDescriptor::from_head(head, body));

    let error = match callbacks.interceptor {
        Some(ref interceptor) => {
            let verdict = interceptor(&Interception {
                session,
                request: &request,
                data: payload.as_ref(),
                response: response.as_ref(),
                error: error.as_ref(),
            });
            match verdict {
                Intercept::Keep => error,
                Intercept::Clear => None,
                Intercept::Replace(replacement) => Some(replacement),
            }
        }
        None => error,
    };

    let result = decode_response(head.as_ref(), payload.as_ref(), error, callbacks.deserializer.as_ref());
    trace::decode_result(handle, &result);

    match result {
        Ok(decoded) => {
            if let Some(ref success) = callbacks.success {
                success(session, &request, response.as_ref(), decoded);
            }
        }
        Err(err) => {
            if let Some(ref failure) = callbacks.failure {
                failure(session, &request, response.as_ref(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use tracing_test::traced_test;

    use super::*;
    use crate::codec::{DataSerializer, Decoded, JsonDeserializer};
    use crate::download::ResumeToken;
    use crate::http::{HttpMethod, RequestBuilder, RequestDescriptor};
    use crate::session::Handlers;
    use crate::transport::Transport;

    #[derive(Default)]
    struct NullTransport {
        events: Mutex<Option<TransportEvents>>,
    }

    impl Transport for NullTransport {
        fn attach(&self, events: TransportEvents) {
            *self.events.lock().unwrap() = Some(events);
        }
        fn start_data(&self, _: TaskHandle, _: Arc<RequestDescriptor>) {}
        fn start_upload(&self, _: TaskHandle, _: Arc<RequestDescriptor>) {}
        fn start_download(&self, _: TaskHandle, _: Arc<RequestDescriptor>) {}
        fn resume_download(&self, _: TaskHandle, _: ResumeToken) {}
        fn cancel(&self, _: TaskHandle) {}
        fn invalidate(&self) {}
    }

    fn issue(session: &Session, handlers: Handlers) -> TaskHandle {
        let request = RequestBuilder::new("https://example.com/a", HttpMethod::Get)
            .build(&DataSerializer::new(), &JsonDeserializer::new())
            .unwrap();
        session
            .issue(request, Arc::new(JsonDeserializer::new()), handlers)
            .unwrap()
    }

    #[test]
    fn test_second_completion_is_dropped() {
        let transport = Arc::new(NullTransport::default());
        let session = Session::with_transport(transport.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let handle = issue(
            &session,
            Handlers::default().on_success(move |_, _, _, decoded| sink.lock().unwrap().push(decoded)),
        );

        let events = transport.events.lock().unwrap().clone().unwrap();
        events.did_receive_response(handle, ResponseHead::new(200));
        events.did_receive_data(handle, br#"{"ok":true}"#);
        events.did_complete(handle, None);
        events.did_complete(handle, None);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Some(Decoded::Json(_))));
        assert!(!session.is_pending(handle));
    }

    #[test]
    fn test_events_outliving_session_are_ignored() {
        let transport = Arc::new(NullTransport::default());
        let session = Session::with_transport(transport.clone());
        let handle = issue(&session, Handlers::default());
        let events = transport.events.lock().unwrap().clone().unwrap();
        drop(session);

        events.did_receive_data(handle, b"late");
        events.did_complete(handle, None);
    }

    #[test]
    #[traced_test]
    fn test_unknown_completion_is_logged() {
        let transport = Arc::new(NullTransport::default());
        let session = Session::with_transport(transport.clone());
        let handle = issue(&session, Handlers::default());
        let events = transport.events.lock().unwrap().clone().unwrap();

        events.did_complete(handle, Some(TransportError::Timeout));
        assert!(!logs_contain("completion for unknown task dropped"));
        events.did_complete(handle, Some(TransportError::Timeout));
        assert!(logs_contain("completion for unknown task dropped"));
    }

    #[test]
    fn test_save_error_supersedes_success() {
        let transport = Arc::new(NullTransport::default());
        let session = Session::with_transport(transport.clone());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let handle = issue(
            &session,
            Handlers::default().on_failure(move |_, _, _, err| sink.lock().unwrap().push(err)),
        );
        let pending = session.inner.registry.remove(handle).unwrap();
        let mut finished = pending.into_parts();
        finished.response = Some(ResponseHead::new(200));
        finished.body = Some(Bytes::from_static(b"{}"));
        finished.saved = Some(Err(MessengerError::transport(TransportError::Io("disk full".into()))));

        settle(&session, handle, finished, None);
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], MessengerError::TransportFailure(_)));
    }
}
