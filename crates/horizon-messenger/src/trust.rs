//! Authentication and server trust challenges.
//!
//! Transports raise an [`AuthChallenge`] whenever the peer asks for
//! credentials or presents a certificate chain. The session routes it to
//! the installed [`TrustDelegate`]: connection-level challenges (TLS server
//! trust) go to [`TrustDelegate::session_challenge`], challenges tied to a
//! running task (HTTP `401`) go to [`TrustDelegate::task_challenge`].
//!
//! Without a delegate the challenge gets default handling with whatever
//! credential the transport proposed.
//!
//! # Example
//!
//! ```ignore
//! use horizon_messenger::trust::{AuthChallenge, AuthenticationMethod, ChallengeDisposition, Credential};
//!
//! session.set_trust_delegate(Some(Arc::new(|challenge: &AuthChallenge| {
//!     match challenge.protection_space.method {
//!         AuthenticationMethod::ServerTrust if challenge.protection_space.host == "dev.local" => {
//!             ChallengeDisposition::UseCredential(Credential::ServerTrust)
//!         }
//!         _ => challenge.default_disposition(),
//!     }
//! })));
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::registry::TaskHandle;
use crate::trace::targets;

/// The kind of authentication a challenge asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationMethod {
    /// TLS server certificate evaluation.
    ServerTrust,
    /// HTTP Basic authentication.
    HttpBasic,
    /// HTTP Digest authentication.
    HttpDigest,
    /// Any other scheme, by name.
    Other(String),
}

impl AuthenticationMethod {
    /// Classify a `WWW-Authenticate` header value by its scheme.
    pub fn from_www_authenticate(value: &str) -> Self {
        let scheme = value.split_whitespace().next().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("basic") {
            Self::HttpBasic
        } else if scheme.eq_ignore_ascii_case("digest") {
            Self::HttpDigest
        } else {
            Self::Other(scheme.to_string())
        }
    }
}

/// Where a challenge comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectionSpace {
    /// Host name.
    pub host: String,
    /// Port, when known at the point of the challenge.
    pub port: Option<u16>,
    /// Authentication realm, if announced.
    pub realm: Option<String>,
    /// Requested authentication method.
    pub method: AuthenticationMethod,
}

/// Result of evaluating a server certificate chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerTrust {
    /// DER-encoded certificates, end entity first.
    pub certificates: Vec<Bytes>,
    /// Outcome of the default evaluation; the error message on failure.
    pub evaluation: Result<(), String>,
}

impl ServerTrust {
    /// Whether the default evaluation accepted the chain.
    pub fn is_trusted(&self) -> bool {
        self.evaluation.is_ok()
    }
}

/// A credential offered in response to a challenge.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Username and password for Basic authentication.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: Option<String>,
    },
    /// Accept the presented server certificate chain.
    ServerTrust,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ServerTrust => f.write_str("ServerTrust"),
        }
    }
}

/// An authentication or trust challenge raised by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Where the challenge comes from.
    pub protection_space: ProtectionSpace,
    /// Credential the transport would use by default.
    pub proposed_credential: Option<Credential>,
    /// Number of failed attempts so far for this challenge.
    pub previous_failure_count: u32,
    /// Certificate chain for server trust challenges.
    pub server_trust: Option<ServerTrust>,
}

impl AuthChallenge {
    /// Default handling with the proposed credential.
    pub fn default_disposition(&self) -> ChallengeDisposition {
        ChallengeDisposition::PerformDefaultHandling(self.proposed_credential.clone())
    }
}

/// How to answer a challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Answer with the given credential.
    UseCredential(Credential),
    /// Let the transport decide, optionally with a credential.
    PerformDefaultHandling(Option<Credential>),
    /// Cancel the challenge; the affected task fails.
    CancelChallenge,
    /// Decline this protection space; the transport falls back to default handling.
    RejectProtectionSpace,
}

/// Answers authentication and trust challenges.
pub trait TrustDelegate: Send + Sync {
    /// Answer a connection-level challenge.
    fn session_challenge(&self, challenge: &AuthChallenge) -> ChallengeDisposition;

    /// Answer a challenge raised for a running task.
    fn task_challenge(&self, task: TaskHandle, challenge: &AuthChallenge) -> ChallengeDisposition {
        let _ = task;
        self.session_challenge(challenge)
    }
}

impl<F> TrustDelegate for F
where
    F: Fn(&AuthChallenge) -> ChallengeDisposition + Send + Sync,
{
    fn session_challenge(&self, challenge: &AuthChallenge) -> ChallengeDisposition {
        self(challenge)
    }
}

/// Swappable delegate slot.
///
/// Resolution clones the current delegate before calling out, so a swap
/// only affects challenges that arrive after it.
#[derive(Default)]
pub(crate) struct TrustSlot {
    delegate: RwLock<Option<Arc<dyn TrustDelegate>>>,
}

impl TrustSlot {
    pub(crate) fn set(&self, delegate: Option<Arc<dyn TrustDelegate>>) {
        *self.delegate.write() = delegate;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.delegate.read().is_some()
    }

    pub(crate) fn resolve(
        &self,
        task: Option<TaskHandle>,
        challenge: &AuthChallenge,
    ) -> ChallengeDisposition {
        let delegate = self.delegate.read().clone();
        let disposition = match (delegate, task) {
            (None, _) => challenge.default_disposition(),
            (Some(delegate), None) => delegate.session_challenge(challenge),
            (Some(delegate), Some(task)) => delegate.task_challenge(task, challenge),
        };
        tracing::debug!(
            target: targets::TRUST,
            host = %challenge.protection_space.host,
            method = ?challenge.protection_space.method,
            ?task,
            ?disposition,
            "challenge resolved"
        );
        disposition
    }
}
