//! HashiCorp Vault HTTP client.
//!
//! Only the handful of endpoints the sidecar needs:
//! - `POST /v1/auth/<mount>/login` (Kubernetes auth)
//! - `GET /v1/<path>`
//! - `PUT /v1/sys/leases/renew`
//! - `POST /v1/auth/token/renew-self`
//! - `POST /v1/auth/token/revoke-self`

use super::{BackendError, LeaseRecord, LoginResponse, SecretBackend, SecretResponse};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct VaultClient {
    base_url: Url,
    namespace: Option<String>,
    auth_method_path: String,
    client: Client,
}

// ============================================================================
// Vault API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct KubernetesLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[derive(Debug, Serialize)]
struct LeaseRenewRequest<'a> {
    lease_id: &'a str,
    increment: u64,
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    auth: Option<AuthBlock>,
}

#[derive(Debug, Deserialize)]
struct AuthBlock {
    #[serde(default)]
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<String>,
}

impl VaultClient {
    pub fn new(
        vault_url: &str,
        namespace: Option<String>,
        auth_method_path: impl Into<String>,
    ) -> Result<Self, BackendError> {
        // `Url::join` replaces the last segment unless the base ends in '/'.
        let mut base = vault_url.trim_end_matches('/').to_string();
        base.push('/');

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| BackendError::Transport {
                url: base.clone(),
                source,
            })?;

        Ok(Self {
            base_url: Url::parse(&base)?,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            auth_method_path: auth_method_path.into(),
            client,
        })
    }

    /// Build a client from the application config.
    pub fn from_config(config: &crate::config::Config) -> Result<Self, BackendError> {
        Self::new(
            &config.vault_url,
            Some(config.namespace.clone()),
            config.vault_auth_method_path.clone(),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(&format!("v1/{}", clean_path(path)))?)
    }

    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(ns) = &self.namespace {
            req = req.header(NAMESPACE_HEADER, ns);
        }
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        req
    }

    async fn send(&self, url: &Url, req: RequestBuilder) -> Result<Response, BackendError> {
        let resp = req.send().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let errors = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.errors)
            .unwrap_or_default();
        let errors = if errors.is_empty() && !body.trim().is_empty() {
            vec![body.trim().to_string()]
        } else {
            errors
        };

        Err(BackendError::Api {
            url: url.to_string(),
            status: status.as_u16(),
            errors,
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        resp: Response,
    ) -> Result<T, BackendError> {
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::decode(url.as_str(), e.to_string()))
    }
}

#[async_trait]
impl SecretBackend for VaultClient {
    async fn login(&self, role: &str, identity_token: &str) -> Result<LoginResponse, BackendError> {
        let url = self.endpoint(&format!("auth/{}/login", self.auth_method_path))?;
        info!("Logging in to Vault at {}", self.base_url);
        debug!(
            "Vault login using path {} role {} jwt [{} bytes]",
            url.path(),
            role,
            identity_token.len()
        );

        let req = self
            .request(Method::POST, url.clone(), None)
            .json(&KubernetesLoginRequest {
                role,
                jwt: identity_token.trim(),
            });
        let resp = self.send(&url, req).await?;
        let envelope: AuthEnvelope = self.json(&url, resp).await?;

        let auth = envelope
            .auth
            .filter(|a| !a.client_token.is_empty())
            .ok_or_else(|| BackendError::decode(url.as_str(), "login response has no client token"))?;

        debug!("Login token duration: {}", auth.lease_duration);
        info!("Login successful");

        Ok(LoginResponse {
            client_token: auth.client_token,
            lease_duration: auth.lease_duration,
        })
    }

    async fn read_secret(&self, token: &str, path: &str) -> Result<SecretResponse, BackendError> {
        let url = self.endpoint(path)?;
        debug!("Reading secret {}", url.path());
        let resp = self.send(&url, self.request(Method::GET, url.clone(), Some(token))).await?;
        self.json(&url, resp).await
    }

    async fn renew_lease(
        &self,
        token: &str,
        lease_id: &str,
        increment: u64,
    ) -> Result<LeaseRecord, BackendError> {
        let url = self.endpoint("sys/leases/renew")?;
        debug!("Renewing lease {}", lease_id);
        let req = self
            .request(Method::PUT, url.clone(), Some(token))
            .json(&LeaseRenewRequest { lease_id, increment });
        let resp = self.send(&url, req).await?;
        self.json(&url, resp).await
    }

    async fn renew_session(&self, token: &str) -> Result<u64, BackendError> {
        let url = self.endpoint("auth/token/renew-self")?;
        debug!("Renewing token lease");
        let resp = self.send(&url, self.request(Method::POST, url.clone(), Some(token))).await?;
        let envelope: AuthEnvelope = self.json(&url, resp).await?;
        envelope
            .auth
            .map(|a| a.lease_duration)
            .ok_or_else(|| BackendError::decode(url.as_str(), "renew-self response has no auth block"))
    }

    async fn revoke_session(&self, token: &str) -> Result<(), BackendError> {
        let url = self.endpoint("auth/token/revoke-self")?;
        debug!("Revoking token lease");
        self.send(&url, self.request(Method::POST, url.clone(), Some(token)))
            .await?;
        Ok(())
    }
}

/// Collapse empty segments so `/kubernetes//` and `kubernetes` map to the
/// same endpoint.
fn clean_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
