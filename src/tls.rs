//! rustls configuration for both roles: trust anchors for the sender,
//! certificate/key loading for the receiver.

use crate::framing::S2sError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::io::BufReader;
use std::sync::Arc;
use tracing::warn;

/// Server name baked into the default certificate Splunk ships.
pub(crate) const DEFAULT_SERVER_NAME: &str = "SplunkServerDefaultCert";

/// Client configuration for [`Connection::connect_tls`](crate::Connection::connect_tls).
///
/// A non-empty `ca_pem` becomes the trust anchor set, otherwise the webpki
/// bundle is used. `insecure` disables certificate verification entirely.
pub(crate) fn client_config(ca_pem: &str, insecure: bool) -> Result<ClientConfig, S2sError> {
    let builder = ClientConfig::builder();
    let config = if insecure {
        warn!("TLS certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let roots = if ca_pem.is_empty() {
            system_roots()
        } else {
            roots_from_pem(ca_pem)?
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Server configuration from a certificate/key file pair.
/// rustls' defaults already require TLS 1.2 or newer.
pub(crate) fn server_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, S2sError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| S2sError::InvalidTls(format!("bad certificate/key pair: {e}")))
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn roots_from_pem(pem: &str) -> Result<RootCertStore, S2sError> {
    let mut roots = RootCertStore::empty();
    let mut reader = BufReader::new(pem.as_bytes());
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| S2sError::InvalidTls(format!("bad CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| S2sError::InvalidTls(format!("rejected CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(S2sError::InvalidTls("no CA certificates in PEM".to_owned()));
    }
    Ok(roots)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, S2sError> {
    let pem = std::fs::read(path).map_err(|e| S2sError::InvalidTls(format!("{path}: {e}")))?;
    let mut reader = BufReader::new(pem.as_slice());
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| S2sError::InvalidTls(format!("{path}: {e}")))?;
    if certs.is_empty() {
        return Err(S2sError::InvalidTls(format!("{path}: no certificates found")));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, S2sError> {
    let pem = std::fs::read(path).map_err(|e| S2sError::InvalidTls(format!("{path}: {e}")))?;
    let mut reader = BufReader::new(pem.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| S2sError::InvalidTls(format!("{path}: {e}")))?
        .ok_or_else(|| S2sError::InvalidTls(format!("{path}: no private key found")))
}

/// Certificate verifier that accepts anything, for `insecure_skip_verify`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
