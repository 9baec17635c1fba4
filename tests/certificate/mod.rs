//! End-to-end certificate-expiry tests against a loopback TLS listener.

use std::sync::Arc;

use statusprobe::provide::certificate::{
    set_probe, CertificateChecker, CertificateConfig, RustlsProbe,
};
use statusprobe::{CheckContext, CheckResult, Monitor};

/// 2100-01-01T00:00:00Z
const NOT_AFTER_UNIX: i64 = 4_102_444_800;

/// Serve one TLS handshake with a self-signed certificate expiring at
/// `NOT_AFTER_UNIX`, returning the bound port.
async fn spawn_tls_server() -> u16 {
    let key = rcgen::KeyPair::generate().expect("generate key");
    let mut params =
        rcgen::CertificateParams::new(vec!["localhost".into()]).expect("cert params");
    params.not_after = time::OffsetDateTime::from_unix_timestamp(NOT_AFTER_UNIX)
        .expect("not_after timestamp");
    let cert = params.self_signed(&key).expect("self-signed cert");

    let cert_der = rustls::pki_types::CertificateDer::from(cert.der().to_vec());
    let key_der = rustls::pki_types::PrivateKeyDer::Pkcs8(key.serialize_der().into());

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("server config");
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind tls listener");
    let port = listener.local_addr().expect("listener addr").port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(stream).await {
                    use tokio::io::AsyncReadExt;
                    let mut scratch = [0u8; 64];
                    let _ = tls.read(&mut scratch).await;
                }
            });
        }
    });

    port
}

#[tokio::test]
async fn known_not_after_is_returned_exactly() {
    let port = spawn_tls_server().await;

    let checker = CertificateChecker::new(
        CertificateConfig {
            url: format!("https://localhost:{port}"),
        },
        [set_probe(Arc::new(RustlsProbe::new()))],
    );

    let result = checker.check(&CheckContext::new()).await.unwrap();
    let expected = chrono::DateTime::<chrono::Utc>::from_timestamp(NOT_AFTER_UNIX, 0)
        .unwrap()
        .to_rfc3339();
    assert_eq!(result, CheckResult::String(expected));
}

#[tokio::test]
async fn closed_port_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let checker = CertificateChecker::new(
        CertificateConfig {
            url: format!("https://127.0.0.1:{port}"),
        },
        [set_probe(Arc::new(RustlsProbe::new()))],
    );
    let err = checker
        .check(&CheckContext::with_timeout(std::time::Duration::from_secs(3)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        statusprobe::CheckError::Connect { .. } | statusprobe::CheckError::DeadlineExceeded
    ));
}
