//! TLS client configuration.
//!
//! Certificate validation is pluggable. The default policy accepts every
//! server certificate; this is insecure and is logged at `warn` whenever a
//! connector is built with it.

use std::sync::Arc;

use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::http::error::HttpError;

/// How server certificates are validated.
#[derive(Debug, Clone)]
pub enum CertificatePolicy {
    /// Accept any certificate. Handshake signatures are still checked.
    AcceptAll,
    /// Verify against the bundled web PKI roots.
    WebPki,
    /// Caller-supplied verifier.
    Custom(Arc<dyn ServerCertVerifier>),
}

impl CertificatePolicy {
    pub fn from_config(config: &TlsConfig) -> Self {
        if config.verify_certificates {
            CertificatePolicy::WebPki
        } else {
            CertificatePolicy::AcceptAll
        }
    }
}

/// Verifier that trusts every certificate chain.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Build a TLS connector for the given policy.
pub fn build_connector(policy: &CertificatePolicy) -> Result<TlsConnector, HttpError> {
    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(e.to_string()))?;

    let config = match policy {
        CertificatePolicy::WebPki => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        CertificatePolicy::AcceptAll => {
            tracing::warn!("TLS certificate verification is disabled; every server certificate is accepted");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth()
        }
        CertificatePolicy::Custom(verifier) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(verifier))
            .with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}
