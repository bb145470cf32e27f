//! Client side TLS setup for the upstream connection.

use std::sync::Arc;

use relay_common::tracing;
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::error::{ClientError, Result};

/// Build a connector trusting the platform's root store, or trusting
/// anything when `accept_invalid_certs` is set.
pub(super) fn connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let config = if accept_invalid_certs {
        tracing::warn!("Upstream certificate verification is disabled");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

fn native_roots() -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    // Log errors but don't fail if some certs couldn't be loaded
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let (added, ignored) = root_store.add_parsable_certificates(certs.certs);
    tracing::debug!(added, ignored, "Loaded platform root certificates");

    if root_store.is_empty() {
        return Err(ClientError::TlsError(String::from(
            "No trusted root certificates available",
        )));
    }

    Ok(root_store)
}

/// The name to verify the upstream certificate against.
pub(super) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))
}

/// A certificate verifier that accepts all certificates.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
