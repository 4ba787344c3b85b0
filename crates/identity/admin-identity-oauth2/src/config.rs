//! OAuth2 client configuration.

use crate::error::{AuthFlowError, OAuth2Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Static configuration of a public OAuth2 client using the Authorization
/// Code grant with PKCE. There is no client secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ClientConfig {
    pub client_id: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Additional parameters to include in the authorization request
    #[serde(default)]
    pub auth_params: HashMap<String, String>,
    /// Where control goes after a successful login
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Tokens expiring within this window are refreshed before use
    #[serde(default = "default_expiry_leeway")]
    pub expiry_leeway_seconds: u64,
    /// Pending login flows older than this are treated as absent
    #[serde(default = "default_pending_flow_ttl")]
    pub pending_flow_ttl_seconds: u64,
}

/// Upper bound for the leeway and pending-flow windows (one year).
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

fn default_post_login_redirect() -> String {
    "/home".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_expiry_leeway() -> u64 {
    60
}

fn default_pending_flow_ttl() -> u64 {
    600 // 10 minutes
}

impl OAuth2ClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            auth_params: HashMap::new(),
            post_login_redirect: default_post_login_redirect(),
            http_timeout_seconds: default_http_timeout(),
            expiry_leeway_seconds: default_expiry_leeway(),
            pending_flow_ttl_seconds: default_pending_flow_ttl(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.insert(key.into(), value.into());
        self
    }

    pub fn with_post_login_redirect(mut self, target: impl Into<String>) -> Self {
        self.post_login_redirect = target.into();
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_expiry_leeway(mut self, seconds: u64) -> Self {
        self.expiry_leeway_seconds = seconds;
        self
    }

    pub fn with_pending_flow_ttl(mut self, seconds: u64) -> Self {
        self.pending_flow_ttl_seconds = seconds;
        self
    }

    /// Space-delimited `scope` parameter value.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn expiry_leeway(&self) -> chrono::Duration {
        window(self.expiry_leeway_seconds)
    }

    pub fn pending_flow_ttl(&self) -> chrono::Duration {
        window(self.pending_flow_ttl_seconds)
    }

    pub fn authorization_url(&self) -> OAuth2Result<Url> {
        parse_endpoint("authorization_endpoint", &self.authorization_endpoint)
    }

    pub fn token_url(&self) -> OAuth2Result<Url> {
        parse_endpoint("token_endpoint", &self.token_endpoint)
    }

    pub fn validate(&self) -> OAuth2Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthFlowError::ConfigError(
                "client_id cannot be empty".to_string(),
            ));
        }

        self.authorization_url()?;
        self.token_url()?;
        parse_endpoint("redirect_uri", &self.redirect_uri)?;

        if self.http_timeout_seconds == 0 {
            return Err(AuthFlowError::ConfigError(
                "http_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        for (name, seconds) in [
            ("expiry_leeway_seconds", self.expiry_leeway_seconds),
            ("pending_flow_ttl_seconds", self.pending_flow_ttl_seconds),
        ] {
            if seconds > MAX_WINDOW_SECONDS {
                return Err(AuthFlowError::ConfigError(format!(
                    "{} must be at most {}",
                    name, MAX_WINDOW_SECONDS
                )));
            }
        }

        Ok(())
    }
}

// Clamped so an unvalidated config cannot overflow date arithmetic
fn window(seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds(seconds.min(MAX_WINDOW_SECONDS) as i64)
}

fn parse_endpoint(name: &str, value: &str) -> OAuth2Result<Url> {
    Url::parse(value)
        .map_err(|e| AuthFlowError::ConfigError(format!("Invalid {}: '{}' ({})", name, value, e)))
}
