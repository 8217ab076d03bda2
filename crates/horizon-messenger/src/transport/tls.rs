//! TLS configuration for the reqwest transport.
//!
//! Certificate chains are evaluated against the webpki roots first; the
//! result is then handed to the session's trust delegate as a
//! [`AuthenticationMethod::ServerTrust`] challenge, which may accept a chain
//! the default evaluation rejected or cancel a connection it accepted.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::{TransportError, TransportEvents};
use crate::trace::targets;
use crate::trust::{
    AuthChallenge, AuthenticationMethod, ChallengeDisposition, Credential, ProtectionSpace,
    ServerTrust,
};

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    pub(crate) fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// Shared slot for the session's event sink, filled on attach.
pub(crate) type EventsSlot = Arc<RwLock<Option<TransportEvents>>>;

/// Certificate verifier that routes the outcome through the trust delegate.
#[derive(Debug)]
pub(crate) struct TrustVerifier {
    events: EventsSlot,
    inner: Arc<WebPkiServerVerifier>,
}

impl TrustVerifier {
    fn challenge(
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        evaluation: &Result<ServerCertVerified, rustls::Error>,
    ) -> AuthChallenge {
        let host = match server_name {
            ServerName::DnsName(name) => name.as_ref().to_string(),
            other => format!("{other:?}"),
        };
        let certificates = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|der| Bytes::copy_from_slice(der.as_ref()))
            .collect();
        AuthChallenge {
            protection_space: ProtectionSpace {
                host,
                port: None,
                realm: None,
                method: AuthenticationMethod::ServerTrust,
            },
            proposed_credential: None,
            previous_failure_count: 0,
            server_trust: Some(ServerTrust {
                certificates,
                evaluation: evaluation
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
            }),
        }
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let evaluation =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        let Some(events) = self.events.read().clone() else {
            return evaluation;
        };
        let challenge = Self::challenge(server_name, end_entity, intermediates, &evaluation);
        match events.did_receive_challenge(None, &challenge) {
            ChallengeDisposition::UseCredential(Credential::ServerTrust) => {
                if evaluation.is_err() {
                    tracing::warn!(
                        target: targets::TRUST,
                        host = %challenge.protection_space.host,
                        "untrusted certificate chain accepted by delegate"
                    );
                }
                Ok(ServerCertVerified::assertion())
            }
            ChallengeDisposition::CancelChallenge => Err(rustls::Error::General(
                "server trust challenge cancelled".to_string(),
            )),
            _ => evaluation,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build the rustls client configuration used by the transport.
pub(crate) fn client_config(
    min_version: TlsVersion,
    events: EventsSlot,
) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider.clone())
        .build()
        .map_err(|e| TransportError::Tls(format!("Failed to build certificate verifier: {}", e)))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&min_version.to_rustls_versions())
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustVerifier { events, inner }))
        .with_no_client_auth();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_version_default() {
        assert_eq!(TlsVersion::default(), TlsVersion::Tls1_2);
    }

    #[test]
    fn test_tls_version_to_rustls_versions() {
        assert_eq!(TlsVersion::Tls1_2.to_rustls_versions().len(), 2);
        assert_eq!(TlsVersion::Tls1_3.to_rustls_versions().len(), 1);
    }

    #[test]
    fn test_client_config_builds() {
        let slot = EventsSlot::default();
        assert!(client_config(TlsVersion::Tls1_3, slot).is_ok());
    }

    #[test]
    fn test_challenge_carries_chain_and_evaluation() {
        let name = ServerName::try_from("example.com").unwrap();
        let leaf = CertificateDer::from(vec![1u8, 2, 3]);
        let intermediate = CertificateDer::from(vec![4u8]);
        let evaluation = Err(rustls::Error::General("unknown issuer".into()));

        let challenge = TrustVerifier::challenge(&name, &leaf, &[intermediate], &evaluation);
        assert_eq!(challenge.protection_space.host, "example.com");
        assert_eq!(challenge.protection_space.method, AuthenticationMethod::ServerTrust);
        let trust = challenge.server_trust.unwrap();
        assert_eq!(trust.certificates.len(), 2);
        assert!(!trust.is_trusted());
    }
}
