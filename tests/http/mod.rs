//! End-to-end HTTP provider tests against the loopback stub.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use statusprobe::provide::http::{
    AuthSpec, BasicAuth, HttpChecker, HttpConfig, Method, MtlsAuth, OAuth2Auth, ProxyAuth,
    ProxyType, TokenSet, CONTENT_TYPE_JSON,
};
use statusprobe::{CheckContext, CheckError, Monitor};

use crate::common::{HttpStub, Route};

fn base_config(url: String) -> HttpConfig {
    HttpConfig {
        url,
        method: Method::Get,
        ..HttpConfig::default()
    }
}

fn token_set(access_token: &str, expiry_offset: ChronoDuration) -> TokenSet {
    TokenSet {
        access_token: access_token.into(),
        token_type: "Bearer".into(),
        expiry: Utc::now() + expiry_offset,
        scope: None,
    }
}

#[tokio::test]
async fn plain_get_returns_the_raw_response() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "all good")]).await;
    let checker = HttpChecker::new(base_config(stub.url("/health")), []);

    let result = checker.check(&CheckContext::new()).await.unwrap();
    assert_eq!(result["status"], 200);
    assert_eq!(result["body"], "all good");
    assert!(result["latency_ms"].is_u64());
    assert_eq!(result["headers"]["content-type"], "text/plain");
}

#[tokio::test]
async fn error_statuses_are_still_successful_checks() {
    // a received response of any status is a successful check
    let stub = HttpStub::start(vec![Route::new("/", 503, "text/plain", "down")]).await;
    let checker = HttpChecker::new(base_config(stub.url("/")), []);

    let result = checker.check(&CheckContext::new()).await.unwrap();
    assert_eq!(result["status"], 503);
}

#[tokio::test]
async fn post_sends_content_type_and_body() {
    let stub = HttpStub::start(vec![Route::new("/", 201, "application/json", "{}")]).await;
    let mut config = base_config(stub.url("/items"));
    config.method = Method::Post;
    config.content_type = CONTENT_TYPE_JSON.into();
    config.body = r#"{"probe":true}"#.into();
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    let requests = stub.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some(CONTENT_TYPE_JSON)
    );
    assert_eq!(requests[0].body, r#"{"probe":true}"#);
}

#[tokio::test]
async fn caller_headers_reach_the_wire_and_override_content_type() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "ok")]).await;
    let mut config = base_config(stub.url("/"));
    config.content_type = CONTENT_TYPE_JSON.into();
    config.headers = BTreeMap::from([
        ("X-Probe".to_string(), "statusprobe".to_string()),
        ("content-type".to_string(), "text/custom".to_string()),
    ]);
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    let requests = stub.requests().await;
    assert_eq!(
        requests[0].headers.get("x-probe").map(String::as_str),
        Some("statusprobe")
    );
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("text/custom")
    );
}

#[tokio::test]
async fn basic_auth_rides_the_authorization_header() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "ok")]).await;
    let mut config = base_config(stub.url("/secure"));
    config.auth = AuthSpec::Basic(BasicAuth {
        username: "scout".into(),
        password: "hunter2".into(),
    });
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    use base64::Engine;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("scout:hunter2")
    );
    let requests = stub.requests().await;
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some(expected.as_str())
    );
}

#[tokio::test]
async fn no_auth_means_no_authorization_header() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "ok")]).await;
    let checker = HttpChecker::new(base_config(stub.url("/")), []);

    checker.check(&CheckContext::new()).await.unwrap();

    let requests = stub.requests().await;
    assert!(!requests[0].headers.contains_key("authorization"));
    assert!(!requests[0].headers.contains_key("proxy-authorization"));
}

#[tokio::test]
async fn proxy_receives_absolute_target_and_proxy_authorization() {
    let proxy = HttpStub::start(vec![Route::new("/", 200, "text/plain", "proxied")]).await;
    let mut config = base_config("http://upstream.invalid/state".into());
    config.proxy_type = ProxyType::Http;
    config.proxy_address = format!("http://{}", proxy.addr);
    config.proxy_auth_enabled = true;
    config.proxy_auth = Some(ProxyAuth {
        username: "user".into(),
        password: "pass".into(),
    });
    let checker = HttpChecker::new(config, []);

    let result = checker.check(&CheckContext::new()).await.unwrap();
    assert_eq!(result["status"], 200);

    use base64::Engine;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("user:pass")
    );
    let requests = proxy.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].target.starts_with("http://upstream.invalid"));
    assert_eq!(
        requests[0]
            .headers
            .get("proxy-authorization")
            .map(String::as_str),
        Some(expected.as_str())
    );
}

#[tokio::test]
async fn expired_token_triggers_exactly_one_exchange() {
    let stub = HttpStub::start(vec![
        Route::new(
            "/token",
            200,
            "application/json",
            r#"{"access_token":"fresh-tok","token_type":"Bearer","expires_in":3600}"#,
        ),
        Route::new("/probe", 200, "text/plain", "ok"),
    ])
    .await;

    let oauth = OAuth2Auth::new(stub.url("/token"), "client", "secret", "probe");
    oauth
        .cache_token(token_set("stale-tok", -ChronoDuration::hours(1)))
        .await;

    let mut config = base_config(stub.url("/probe"));
    config.auth = AuthSpec::OAuth2(oauth.clone());
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    assert_eq!(stub.hits("/token").await, 1);
    let probe = stub
        .requests()
        .await
        .into_iter()
        .find(|r| r.path.starts_with("/probe"))
        .expect("probe request");
    assert_eq!(
        probe.headers.get("authorization").map(String::as_str),
        Some("Bearer fresh-tok")
    );

    // the refreshed token is cached for subsequent checks
    let cached = oauth.cached_token().await.expect("cached token");
    assert_eq!(cached.access_token, "fresh-tok");
}

#[tokio::test]
async fn future_dated_token_skips_the_exchange() {
    let stub = HttpStub::start(vec![
        Route::new(
            "/token",
            200,
            "application/json",
            r#"{"access_token":"should-not-be-used","token_type":"Bearer","expires_in":3600}"#,
        ),
        Route::new("/probe", 200, "text/plain", "ok"),
    ])
    .await;

    let oauth = OAuth2Auth::new(stub.url("/token"), "client", "secret", "");
    oauth
        .cache_token(token_set("cached-tok", ChronoDuration::hours(1)))
        .await;

    let mut config = base_config(stub.url("/probe"));
    config.auth = AuthSpec::OAuth2(oauth);
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    assert_eq!(stub.hits("/token").await, 0);
    let probe = stub
        .requests()
        .await
        .into_iter()
        .find(|r| r.path.starts_with("/probe"))
        .expect("probe request");
    assert_eq!(
        probe.headers.get("authorization").map(String::as_str),
        Some("Bearer cached-tok")
    );
}

#[tokio::test]
async fn rejected_exchange_aborts_the_check() {
    let stub = HttpStub::start(vec![
        Route::new("/token", 401, "application/json", r#"{"error":"invalid_client"}"#),
        Route::new("/probe", 200, "text/plain", "ok"),
    ])
    .await;

    let mut config = base_config(stub.url("/probe"));
    config.auth = AuthSpec::OAuth2(OAuth2Auth::new(stub.url("/token"), "client", "bad", ""));
    let checker = HttpChecker::new(config, []);

    let err = checker.check(&CheckContext::new()).await.unwrap_err();
    assert!(matches!(err, CheckError::Auth(_)));
    // the probe request never went out
    assert_eq!(stub.hits("/probe").await, 0);
}

#[tokio::test]
async fn token_exchange_delivers_credentials_per_configuration() {
    let stub = HttpStub::start(vec![
        Route::new(
            "/token",
            200,
            "application/json",
            r#"{"access_token":"t","token_type":"Bearer","expires_in":60}"#,
        ),
        Route::new("/probe", 200, "text/plain", "ok"),
    ])
    .await;

    let oauth = OAuth2Auth::new(stub.url("/token"), "client", "secret", "probe")
        .with_delivery(statusprobe::provide::http::TokenDelivery::Body);
    let mut config = base_config(stub.url("/probe"));
    config.auth = AuthSpec::OAuth2(oauth);
    let checker = HttpChecker::new(config, []);

    checker.check(&CheckContext::new()).await.unwrap();

    let token_request = stub
        .requests()
        .await
        .into_iter()
        .find(|r| r.path.starts_with("/token"))
        .expect("token request");
    assert!(!token_request.headers.contains_key("authorization"));
    assert!(token_request.body.contains("client_id=client"));
    assert!(token_request.body.contains("client_secret=secret"));
    assert!(token_request.body.contains("grant_type=client_credentials"));
}

#[tokio::test]
async fn malformed_mtls_material_fails_without_network_io() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "ok")]).await;
    let mut config = base_config(stub.url("/"));
    config.auth = AuthSpec::Mtls(MtlsAuth {
        cert: "-----BEGIN GARBAGE-----".into(),
        key: "nope".into(),
        ca: String::new(),
    });
    let checker = HttpChecker::new(config, []);

    let err = checker.check(&CheckContext::new()).await.unwrap_err();
    assert!(matches!(err, CheckError::Config(_)));
    assert!(stub.requests().await.is_empty());
}

#[tokio::test]
async fn cancelled_context_never_yields_a_success() {
    let stub = HttpStub::start(vec![Route::new("/", 200, "text/plain", "ok")]).await;
    let checker = HttpChecker::new(base_config(stub.url("/")), []);

    let cx = CheckContext::new();
    cx.cancel();
    let err = checker.check(&cx).await.unwrap_err();
    assert!(matches!(err, CheckError::Cancelled));
}

#[tokio::test]
async fn unreachable_server_is_a_connect_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let checker = HttpChecker::new(base_config(format!("http://127.0.0.1:{port}/")), []);
    let cx = CheckContext::with_timeout(Duration::from_secs(3));
    let err = checker.check(&cx).await.unwrap_err();
    assert!(matches!(
        err,
        CheckError::Connect { .. } | CheckError::DeadlineExceeded
    ));
}

#[tokio::test]
async fn malformed_url_fails_fast() {
    let checker = HttpChecker::new(base_config("not a url at all".into()), []);
    let err = checker.check(&CheckContext::new()).await.unwrap_err();
    assert!(matches!(err, CheckError::Config(_)));
}
