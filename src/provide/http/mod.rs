//! Generic HTTP endpoint checker.
//!
//! The interesting part of this provider is the resolution pipeline in
//! [`transport`]: a request configuration carrying one of several
//! authentication schemes, an optional proxy and a certificate-verification
//! policy is resolved into a single outbound request. Any received response
//! is a successful check regardless of its status code; interpreting status
//! codes is left to the caller.

mod auth;
mod tls;
mod transport;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};
use crate::options::{self, Opt};

pub use auth::{
    AuthSpec, BasicAuth, MtlsAuth, NtlmAuth, OAuth2Auth, ProxyAuth, TokenDelivery, TokenSet,
};
pub use transport::HttpResponse;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

/// Proxy sub-type. Carried for caller documentation; every non-none type
/// wires the address onto the transport identically, and the address scheme
/// selects the actual dial mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    #[serde(rename = "SOCKS")]
    Socks,
    #[serde(rename = "SOCKS4")]
    Socks4,
    #[serde(rename = "SOCKS5")]
    Socks5,
    #[serde(rename = "SOCKS5DNS")]
    Socks5Dns,
}

/// Request configuration for one HTTP check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
    /// Caller-supplied headers; same key (case-insensitive) overwrites the
    /// configured content type, last write wins.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub auth: AuthSpec,
    #[serde(default)]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub proxy_address: String,
    #[serde(default)]
    pub proxy_auth_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_auth: Option<ProxyAuth>,
    #[serde(default)]
    pub skip_certificate_verify: bool,
}

/// Optional knobs for [`HttpChecker`].
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    request_timeout: Option<Duration>,
}

/// Override the per-dispatch fallback timeout (default 30 s).
pub fn set_request_timeout(timeout: Duration) -> Opt<HttpOptions> {
    Opt::new(move |o: &mut HttpOptions| o.request_timeout = Some(timeout))
}

pub struct HttpChecker {
    config: HttpConfig,
    option: HttpOptions,
}

impl HttpChecker {
    pub fn new(config: HttpConfig, opts: impl IntoIterator<Item = Opt<HttpOptions>>) -> Self {
        let mut option = HttpOptions::default();
        options::apply(&mut option, opts);
        HttpChecker { config, option }
    }
}

#[async_trait::async_trait]
impl Monitor for HttpChecker {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.url.is_empty() {
            return Err(CheckError::Config("url is empty".into()));
        }
        url::Url::parse(&self.config.url)
            .map_err(|e| CheckError::Config(format!("malformed url {}: {e}", self.config.url)))?;

        // OAuth2 resolves its token up front; every other scheme is applied
        // entirely during transport resolution
        let token = match &self.config.auth {
            AuthSpec::OAuth2(oauth) => Some(oauth.bearer(cx).await?),
            _ => None,
        };

        let handle = transport::resolve(&self.config, token.as_ref())?;
        let fallback = self
            .option
            .request_timeout
            .unwrap_or(transport::DEFAULT_REQUEST_TIMEOUT);

        let started = std::time::Instant::now();
        let mut response = transport::dispatch(cx, handle, &self.config.url, fallback).await?;
        let latency = started.elapsed();

        tracing::debug!(
            url = %self.config.url,
            status = response.status,
            latency_ms = latency.as_millis() as u64,
            "http check completed"
        );

        let payload = serde_json::json!({
            "status": response.status,
            "http_version": response.http_version.take(),
            "headers": response.headers,
            "body": response.body,
            "latency_ms": latency.as_millis() as u64,
        });
        Ok(payload)
    }
}
