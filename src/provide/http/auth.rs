//! Authentication configuration for the HTTP provider.
//!
//! Auth parameters are a tagged union over the supported schemes, so a
//! payload can never disagree with its scheme tag. The OAuth2 variant owns
//! an in-memory token cache that is consulted before every request and
//! refreshed through a client-credentials exchange when the cached token is
//! absent or no longer strictly future-dated.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use isahc::config::Configurable;
use isahc::AsyncReadResponseExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckError;
use crate::monitor::CheckContext;

/// Bound on the token exchange, matching the original's dedicated client.
pub(crate) const TOKEN_EXCHANGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Authentication scheme plus its parameters.
///
/// Serialized adjacently (`auth_type` + `auth_config`), keeping the wire
/// tag values of existing configs. The tag is always present; no
/// authentication serializes as an empty `auth_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "auth_type", content = "auth_config")]
pub enum AuthSpec {
    /// No authentication; the request succeeds or fails purely on
    /// network/server grounds.
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "Basic")]
    Basic(BasicAuth),
    #[serde(rename = "Oauth2")]
    OAuth2(OAuth2Auth),
    #[serde(rename = "NTLM")]
    Ntlm(NtlmAuth),
    #[serde(rename = "mTls")]
    Mtls(MtlsAuth),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Where the client credentials travel during the token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TokenDelivery {
    /// `Authorization: Basic base64(id:secret)` on the token request.
    #[default]
    #[serde(rename = "client_secret_basic")]
    Header,
    /// `client_id`/`client_secret` pairs in the form body.
    #[serde(rename = "client_secret_post")]
    Body,
}

/// OAuth2 client-credentials configuration with its cached token set.
///
/// Cloning shares the cache: the token is per-config-instance, in-memory
/// only, and mutated in place on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Auth {
    #[serde(default)]
    pub authentication_method: TokenDelivery,
    #[serde(rename = "oauth_token_url")]
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(rename = "oauth_scope", default)]
    pub scope: String,
    #[serde(skip)]
    cache: Arc<Mutex<Option<TokenSet>>>,
}

impl OAuth2Auth {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        OAuth2Auth {
            authentication_method: TokenDelivery::default(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cache: Arc::default(),
        }
    }

    pub fn with_delivery(mut self, delivery: TokenDelivery) -> Self {
        self.authentication_method = delivery;
        self
    }

    /// Snapshot of the cached token set, if any.
    pub async fn cached_token(&self) -> Option<TokenSet> {
        self.cache.lock().await.clone()
    }

    /// Seed the cache, e.g. with a token obtained elsewhere.
    pub async fn cache_token(&self, token: TokenSet) {
        *self.cache.lock().await = Some(token);
    }

    /// Return a valid token, exchanging credentials first when the cached
    /// set is absent or its expiry is not strictly in the future.
    ///
    /// A failed exchange aborts the surrounding check; it is not retried.
    pub(crate) async fn bearer(&self, cx: &CheckContext) -> Result<TokenSet, CheckError> {
        let mut slot = self.cache.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.is_valid(Utc::now()) {
                return Ok(token.clone());
            }
        }

        tracing::debug!(token_url = %self.token_url, "refreshing oauth2 token");
        let fresh = cx.run(TOKEN_EXCHANGE_TIMEOUT, exchange(self)).await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtlmAuth {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub workstation: String,
}

/// Client certificate, key and optional CA bundle, all PEM text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsAuth {
    pub cert: String,
    pub key: String,
    #[serde(default)]
    pub ca: String,
}

/// Credentials attached as `Proxy-Authorization` when proxy auth is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Cached OAuth2 access token plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// A token is valid only while `now` is strictly before its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }

    /// Scheme for the `Authorization` header; empty token types fall back
    /// to `Bearer`.
    pub fn scheme(&self) -> &str {
        if self.token_type.is_empty() {
            "Bearer"
        } else {
            &self.token_type
        }
    }
}

/// Wire shape of a token-endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// One client-credentials exchange against the configured token endpoint.
async fn exchange(auth: &OAuth2Auth) -> Result<TokenSet, CheckError> {
    let mut builder = isahc::Request::post(&auth.token_url)
        .timeout(TOKEN_EXCHANGE_TIMEOUT)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json");

    let body = {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "client_credentials");
        if !auth.scope.is_empty() {
            form.append_pair("scope", &auth.scope);
        }

        match auth.authentication_method {
            TokenDelivery::Header => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", auth.client_id, auth.client_secret));
                builder = builder.header("Authorization", format!("Basic {credentials}"));
            }
            TokenDelivery::Body => {
                form.append_pair("client_id", &auth.client_id);
                form.append_pair("client_secret", &auth.client_secret);
            }
        }

        form.finish()
    };

    let request = builder
        .body(body)
        .map_err(|e| CheckError::Config(format!("invalid token endpoint request: {e}")))?;

    let mut response = isahc::send_async(request)
        .await
        .map_err(|e| CheckError::connect("exchange token with", auth.token_url.clone(), e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CheckError::connect("read token response from", auth.token_url.clone(), e))?;

    if !status.is_success() {
        return Err(CheckError::Auth(format!(
            "token endpoint {} returned {}: {}",
            auth.token_url,
            status,
            text.trim()
        )));
    }

    let raw: TokenResponse = serde_json::from_str(&text)
        .map_err(|e| CheckError::Auth(format!("token endpoint {} sent unparseable JSON: {e}", auth.token_url)))?;

    let token_type = if raw.token_type.is_empty() {
        "Bearer".to_string()
    } else {
        raw.token_type
    };

    Ok(TokenSet {
        access_token: raw.access_token,
        token_type,
        expiry: Utc::now() + ChronoDuration::seconds(raw.expires_in.unwrap_or(3600)),
        scope: raw.scope.or_else(|| {
            if auth.scope.is_empty() {
                None
            } else {
                Some(auth.scope.clone())
            }
        }),
    })
}
