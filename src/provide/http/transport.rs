//! Transport resolution pipeline for the HTTP provider.
//!
//! A fresh, fully-configured curl handle is built for every check; nothing
//! transport-level is shared between calls. Resolution runs as an ordered
//! sequence of stages, split the way the transport stack applies them:
//! TLS trust, auth-driven transport setup and proxying are connection
//! properties; headers, body and bearer tokens are request properties.

use std::collections::BTreeMap;
use std::time::Duration;

use curl::easy::{Auth, Easy2, Handler, List, WriteError};
use serde::Serialize;

use crate::error::CheckError;
use crate::monitor::CheckContext;

use super::auth::{AuthSpec, TokenSet};
use super::tls;
use super::{HttpConfig, Method, ProxyType};

/// Upper bound on a single dispatch when the caller's context carries no
/// tighter deadline.
pub(super) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response accumulator driven by curl's write/header callbacks.
#[derive(Debug, Default)]
pub(super) struct Collector {
    body: Vec<u8>,
    header_lines: Vec<String>,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        self.header_lines
            .push(String::from_utf8_lossy(data).trim_end().to_string());
        true
    }
}

/// Raw response of a successful dispatch. Never inspected for status-code
/// success by the provider; interpreting the status is the caller's job.
#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub http_version: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Request headers with case-insensitive, last-write-wins semantics.
#[derive(Debug, Default)]
pub(super) struct HeaderSet(Vec<(String, String)>);

impl HeaderSet {
    pub(super) fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .0
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            entry.0 = name.to_string();
            entry.1 = value.to_string();
        } else {
            self.0.push((name.to_string(), value.to_string()));
        }
    }

    #[cfg(test)]
    pub(super) fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn to_list(&self) -> Result<List, CheckError> {
        let mut list = List::new();
        for (name, value) in &self.0 {
            list.append(&format!("{name}: {value}")).map_err(setup_error)?;
        }
        Ok(list)
    }
}

fn setup_error(e: curl::Error) -> CheckError {
    CheckError::Config(format!("transport setup failed: {e}"))
}

/// Stages 1–5: produce a ready-to-send handle for `config`.
///
/// `token` is the pre-resolved OAuth2 token set when the config uses
/// OAuth2; other auth types pass `None`.
pub(super) fn resolve(
    config: &HttpConfig,
    token: Option<&TokenSet>,
) -> Result<Easy2<Collector>, CheckError> {
    let mut handle = Easy2::new(Collector::default());

    apply_trust_policy(&mut handle, config)?;
    apply_transport_auth(&mut handle, config)?;
    apply_proxy(&mut handle, config)?;
    shape_request(&mut handle, config)?;
    apply_request_credentials(&mut handle, config)?;

    let headers = resolve_headers(config, token)?;
    handle.http_headers(headers.to_list()?).map_err(setup_error)?;

    Ok(handle)
}

/// Stage 1: certificate-verification policy. Runs before auth because the
/// mTLS stage augments the same TLS state.
fn apply_trust_policy(handle: &mut Easy2<Collector>, config: &HttpConfig) -> Result<(), CheckError> {
    if config.skip_certificate_verify {
        handle.ssl_verify_peer(false).map_err(setup_error)?;
        handle.ssl_verify_host(false).map_err(setup_error)?;
    }
    Ok(())
}

/// Stage 2: auth-driven transport setup. NTLM arms curl's negotiator;
/// mTLS validates the PEM material in memory and installs it. Every other
/// auth type leaves the transport untouched.
fn apply_transport_auth(
    handle: &mut Easy2<Collector>,
    config: &HttpConfig,
) -> Result<(), CheckError> {
    match &config.auth {
        AuthSpec::Ntlm(_) => {
            let mut auth = Auth::new();
            auth.ntlm(true);
            handle.http_auth(&auth).map_err(setup_error)?;
        }
        AuthSpec::Mtls(mtls) if !mtls.cert.is_empty() => {
            let identity = tls::load_identity(&mtls.cert, &mtls.key, &mtls.ca)?;
            handle.ssl_cert_blob(&identity.cert_pem).map_err(setup_error)?;
            handle.ssl_cert_type("PEM").map_err(setup_error)?;
            handle.ssl_key_blob(&identity.key_pem).map_err(setup_error)?;
            handle.ssl_key_type("PEM").map_err(setup_error)?;
            if let Some(ca_pem) = &identity.ca_pem {
                handle.ssl_cainfo_blob(ca_pem).map_err(setup_error)?;
            }
            tracing::debug!(subject = %identity.subject, "client identity installed");
        }
        _ => {}
    }
    Ok(())
}

/// Stage 3: proxy address wiring. Every non-none sub-type is wired
/// identically; the address scheme (http://, socks5://, ...) carries the
/// dial mechanics, so sub-type branching lives in the transport.
fn apply_proxy(handle: &mut Easy2<Collector>, config: &HttpConfig) -> Result<(), CheckError> {
    if config.proxy_type == ProxyType::None {
        return Ok(());
    }
    if config.proxy_address.is_empty() {
        return Err(CheckError::Config(
            "proxy enabled but proxy_address is empty".into(),
        ));
    }
    handle.proxy(&config.proxy_address).map_err(setup_error)
}

/// Stage 4 (handle half): method, URL and body.
fn shape_request(handle: &mut Easy2<Collector>, config: &HttpConfig) -> Result<(), CheckError> {
    handle.url(&config.url).map_err(setup_error)?;
    handle.follow_location(true).map_err(setup_error)?;
    handle.max_redirections(10).map_err(setup_error)?;

    let has_body = !config.body.is_empty();
    if has_body {
        handle
            .post_fields_copy(config.body.as_bytes())
            .map_err(setup_error)?;
    }
    match config.method {
        Method::Get if !has_body => handle.get(true).map_err(setup_error)?,
        Method::Head => handle.nobody(true).map_err(setup_error)?,
        Method::Post => handle.post(true).map_err(setup_error)?,
        // post_fields_copy forces the verb to POST, so everything else is
        // restated explicitly
        other => handle
            .custom_request(other.as_str())
            .map_err(setup_error)?,
    }
    Ok(())
}

/// Stage 5 (handle half): credentials curl consumes itself. Basic sends
/// preemptively; NTLM credentials feed the stage-2 negotiator during the
/// handshake, with the domain folded in curl's `DOMAIN\user` form.
fn apply_request_credentials(
    handle: &mut Easy2<Collector>,
    config: &HttpConfig,
) -> Result<(), CheckError> {
    match &config.auth {
        AuthSpec::Basic(basic) => {
            let mut auth = Auth::new();
            auth.basic(true);
            handle.http_auth(&auth).map_err(setup_error)?;
            handle.username(&basic.username).map_err(setup_error)?;
            handle.password(&basic.password).map_err(setup_error)?;
        }
        AuthSpec::Ntlm(ntlm) => {
            let user = if ntlm.domain.is_empty() {
                ntlm.username.clone()
            } else {
                format!("{}\\{}", ntlm.domain, ntlm.username)
            };
            handle.username(&user).map_err(setup_error)?;
            handle.password(&ntlm.password).map_err(setup_error)?;
        }
        _ => {}
    }
    Ok(())
}

/// Stages 4/5 (header half): content type, caller headers, per-request
/// auth headers, then proxy credentials, in the original's write order so
/// later writers win on identical keys.
pub(super) fn resolve_headers(
    config: &HttpConfig,
    token: Option<&TokenSet>,
) -> Result<HeaderSet, CheckError> {
    let mut headers = HeaderSet::default();

    if !config.content_type.is_empty() {
        headers.set("Content-Type", &config.content_type);
    }
    for (name, value) in &config.headers {
        headers.set(name, value);
    }

    match &config.auth {
        AuthSpec::OAuth2(_) => {
            let token = token.ok_or_else(|| {
                CheckError::Auth("oauth2 configured but no token was resolved".into())
            })?;
            headers.set(
                "Authorization",
                &format!("{} {}", token.scheme(), token.access_token),
            );
        }
        AuthSpec::Ntlm(ntlm) => {
            if !ntlm.domain.is_empty() {
                headers.set("X-NTLM-Domain", &ntlm.domain);
            }
            if !ntlm.workstation.is_empty() {
                headers.set("X-NTLM-Workstation", &ntlm.workstation);
            }
        }
        _ => {}
    }

    if !config.proxy_address.is_empty() && config.proxy_auth_enabled {
        if let Some(proxy_auth) = &config.proxy_auth {
            use base64::Engine;
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", proxy_auth.username, proxy_auth.password));
            headers.set("Proxy-Authorization", &format!("Basic {credentials}"));
        }
    }

    Ok(headers)
}

/// Stage 6: perform the request under the caller's context. `fallback`
/// bounds the dispatch when the context carries no tighter deadline.
pub(super) async fn dispatch(
    cx: &CheckContext,
    mut handle: Easy2<Collector>,
    target: &str,
    fallback: Duration,
) -> Result<HttpResponse, CheckError> {
    if cx.is_cancelled() {
        return Err(CheckError::Cancelled);
    }
    let budget = cx.remaining().map_or(fallback, |r| r.min(fallback));
    handle.timeout(budget).map_err(setup_error)?;

    let task = tokio::task::spawn_blocking(move || {
        let outcome = handle.perform();
        (handle, outcome)
    });

    // curl's own timeout fires first under normal operation; the extra
    // second keeps its more descriptive error ahead of the context race
    let (handle, outcome) = cx
        .run(budget + Duration::from_secs(1), async {
            task.await
                .map_err(|e| CheckError::Protocol(format!("probe task failed: {e}")))
        })
        .await?;

    if let Err(e) = outcome {
        if e.is_operation_timedout() {
            return Err(CheckError::DeadlineExceeded);
        }
        return Err(CheckError::connect("send request to", target.to_string(), e));
    }

    let status = handle
        .response_code()
        .map_err(|e| CheckError::connect("read response from", target.to_string(), e))?
        as u16;

    let collector = handle.get_ref();
    let (http_version, headers) = response_parts(&collector.header_lines);

    Ok(HttpResponse {
        status,
        http_version,
        headers,
        body: String::from_utf8_lossy(&collector.body).into_owned(),
    })
}

/// Fold curl's header callback lines into the final response's version and
/// header map. Auth handshakes and redirects produce several status blocks;
/// only the last one describes the response handed back.
fn response_parts(lines: &[String]) -> (Option<String>, BTreeMap<String, String>) {
    let mut version = None;
    let mut headers = BTreeMap::new();
    for line in lines {
        if line.starts_with("HTTP/") {
            version = line.split_whitespace().next().map(str::to_string);
            headers.clear();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    (version, headers)
}
