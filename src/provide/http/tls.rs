//! In-memory validation of mutual-TLS material.
//!
//! The transport consumes raw PEM blobs, so malformed certificate or key
//! input would otherwise only fail deep inside the TLS handshake. Parsing
//! here keeps the failure a fast, descriptive configuration error that
//! fires before any socket is opened.

use x509_parser::prelude::FromDer;

use crate::error::CheckError;

/// Validated client identity ready to hand to the transport.
#[derive(Debug)]
pub(crate) struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// CA bundle appended to the trust store; `None` when not configured.
    pub ca_pem: Option<Vec<u8>>,
    /// Subject of the leaf certificate, e.g. `CN=probe-client`.
    pub subject: String,
}

/// Parse and validate a PEM certificate/key pair plus optional CA bundle.
pub(crate) fn load_identity(cert: &str, key: &str, ca: &str) -> Result<ClientIdentity, CheckError> {
    let certs = rustls_pemfile::certs(&mut cert.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CheckError::Config(format!("malformed client certificate PEM: {e}")))?;
    let leaf = certs
        .first()
        .ok_or_else(|| CheckError::Config("client certificate PEM contains no certificate".into()))?;

    let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| CheckError::Config(format!("unparseable client certificate: {e}")))?;
    let subject = parsed.subject().to_string();

    rustls_pemfile::private_key(&mut key.as_bytes())
        .map_err(|e| CheckError::Config(format!("malformed client key PEM: {e}")))?
        .ok_or_else(|| CheckError::Config("client key PEM contains no private key".into()))?;

    let ca_pem = if ca.trim().is_empty() {
        None
    } else {
        let ca_certs = rustls_pemfile::certs(&mut ca.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CheckError::Config(format!("malformed CA bundle PEM: {e}")))?;
        if ca_certs.is_empty() {
            return Err(CheckError::Config("CA bundle PEM contains no certificate".into()));
        }
        Some(ca.as_bytes().to_vec())
    };

    Ok(ClientIdentity {
        cert_pem: cert.as_bytes().to_vec(),
        key_pem: key.as_bytes().to_vec(),
        ca_pem,
        subject,
    })
}
