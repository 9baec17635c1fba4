//! Certificate-expiry checker.
//!
//! Opens a verification-skipping TLS session to the target host and reads
//! the leaf certificate's NotAfter; no request is sent. The TLS session
//! factory is an injectable seam so tests can run without a network.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::FromDer;

use crate::error::{BoxError, CheckError};
use crate::monitor::{CheckContext, CheckResult, Monitor};
use crate::options::{self, Opt};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TLS_PORT: u16 = 443;

/// Leaf certificate facts extracted from a TLS session.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    pub not_after: DateTime<Utc>,
    pub subject: String,
}

/// Opens one TLS session and reports the peer's leaf certificate.
///
/// `Ok(None)` means the session yielded no certificate at all.
#[async_trait::async_trait]
pub trait TlsProbe: Send + Sync {
    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Option<PeerCertificate>, BoxError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub url: String,
}

#[derive(Default)]
pub struct CertificateOptions {
    probe: Option<Arc<dyn TlsProbe>>,
}

/// Install the TLS session factory. The checker is unusable until one is
/// provided; [`RustlsProbe`] is the stock implementation.
pub fn set_probe(probe: Arc<dyn TlsProbe>) -> Opt<CertificateOptions> {
    Opt::new(move |o: &mut CertificateOptions| o.probe = Some(probe))
}

pub struct CertificateChecker {
    config: CertificateConfig,
    option: CertificateOptions,
}

impl CertificateChecker {
    pub fn new(
        config: CertificateConfig,
        opts: impl IntoIterator<Item = Opt<CertificateOptions>>,
    ) -> Self {
        let mut option = CertificateOptions::default();
        options::apply(&mut option, opts);
        CertificateChecker { config, option }
    }

    fn target(&self) -> Result<(String, u16), CheckError> {
        let url = url::Url::parse(&self.config.url)
            .map_err(|e| CheckError::Config(format!("malformed url {}: {e}", self.config.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| CheckError::Config(format!("url {} has no host", self.config.url)))?
            .to_string();
        Ok((host, url.port().unwrap_or(DEFAULT_TLS_PORT)))
    }
}

#[async_trait::async_trait]
impl Monitor for CertificateChecker {
    fn name(&self) -> &'static str {
        "certificate_expires"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        let (host, port) = self.target()?;
        let probe = self
            .option
            .probe
            .as_ref()
            .ok_or_else(|| CheckError::Config("TLS probe is not initialized".into()))?;

        let certificate = cx
            .run(HANDSHAKE_TIMEOUT, async {
                probe
                    .peer_certificate(&host, port)
                    .await
                    .map_err(|e| CheckError::connect("open TLS session to", format!("{host}:{port}"), e))
            })
            .await?;

        let certificate = certificate.ok_or_else(|| {
            CheckError::Protocol(format!("received no TLS response from {host}:{port}"))
        })?;

        tracing::debug!(
            host = %host,
            subject = %certificate.subject,
            not_after = %certificate.not_after,
            "leaf certificate read"
        );

        Ok(CheckResult::String(certificate.not_after.to_rfc3339()))
    }
}

/// Stock [`TlsProbe`]: tokio-rustls with a permissive verifier, so expiry
/// can be read from hosts whose chains would not normally validate.
pub struct RustlsProbe {
    connector: tokio_rustls::TlsConnector,
}

impl Default for RustlsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RustlsProbe {
    pub fn new() -> Self {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        RustlsProbe {
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait::async_trait]
impl TlsProbe for RustlsProbe {
    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Option<PeerCertificate>, BoxError> {
        let tcp = tokio::net::TcpStream::connect((host, port)).await?;
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
        let stream = self.connector.connect(server_name, tcp).await?;

        let (_, session) = stream.get_ref();
        let Some(der) = session.peer_certificates().and_then(|certs| certs.first()) else {
            return Ok(None);
        };

        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(der.as_ref())
            .map_err(|e| format!("unparseable peer certificate: {e}"))?;
        let not_after = DateTime::<Utc>::from_timestamp(
            parsed.validity().not_after.to_datetime().unix_timestamp(),
            0,
        )
        .ok_or("peer certificate NotAfter out of range")?;

        Ok(Some(PeerCertificate {
            not_after,
            subject: parsed.subject().to_string(),
        }))
    }
}

/// Verifier that accepts any server certificate. Expiry inspection must
/// work against hosts with broken or self-signed chains.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
