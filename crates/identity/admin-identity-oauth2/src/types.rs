//! OAuth2 protocol and session types.

use crate::error::{AuthFlowError, OAuth2Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Secrets of a login that has been started but whose callback has not
/// been resolved yet.
#[derive(Clone, Serialize, Deserialize)]
pub struct PendingFlow {
    pub verifier: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl PendingFlow {
    pub fn new(verifier: String, state: String) -> Self {
        Self {
            verifier,
            state,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() > self.created_at + ttl
    }
}

impl fmt::Debug for PendingFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlow")
            .field("verifier", &"<redacted>")
            .field("state", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Tokens issued to the current session. Always replaced as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl TokenSet {
    /// Build the token set issued by an authorization code exchange.
    pub fn issued(response: TokenResponse, issued_at: DateTime<Utc>) -> OAuth2Result<Self> {
        if response.access_token.is_empty() {
            return Err(AuthFlowError::ExchangeFailed(ProviderFailure::malformed(
                "access_token is empty",
            )));
        }

        Ok(Self {
            expires_at: expiry_from(response.expires_in, issued_at),
            access_token: response.access_token,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        })
    }

    /// Build the successor of `self` from a refresh response. Refresh and
    /// ID tokens the provider did not rotate are carried forward.
    pub fn rotated(&self, response: TokenResponse, issued_at: DateTime<Utc>) -> OAuth2Result<Self> {
        if response.access_token.is_empty() {
            return Err(AuthFlowError::RefreshRejected(
                "access_token is empty".to_string(),
            ));
        }

        Ok(Self {
            expires_at: expiry_from(response.expires_in, issued_at),
            access_token: response.access_token,
            id_token: response.id_token.or_else(|| self.id_token.clone()),
            refresh_token: response
                .refresh_token
                .or_else(|| self.refresh_token.clone()),
            token_type: response
                .token_type
                .unwrap_or_else(|| self.token_type.clone()),
            scope: response.scope.or_else(|| self.scope.clone()),
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True when the token expires within `leeway` from now. Tokens without
    /// a known expiry never report as expiring.
    pub fn expires_within(&self, leeway: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + leeway >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Lifetimes too large to represent are treated as an unknown expiry.
fn expiry_from(expires_in: Option<u64>, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in?).ok()?;
    issued_at.checked_add_signed(Duration::try_seconds(secs)?)
}

/// OAuth2 token endpoint success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Query parameters the identity provider sends back to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a full callback URL such as `https://app/callback?code=..&state=..`.
    pub fn from_url(callback_url: &str) -> OAuth2Result<Self> {
        let url = Url::parse(callback_url).map_err(|_| AuthFlowError::InvalidCallback)?;
        Ok(Self::from_query(url.query().unwrap_or_default()))
    }

    /// Parse a raw query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            // First occurrence wins
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        params
    }
}

/// Error details returned by the token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Response body when it was not a standard OAuth2 error document
    pub body: Option<String>,
}

#[derive(Deserialize)]
struct OAuth2ErrorBody {
    error: String,
    error_description: Option<String>,
}

impl ProviderFailure {
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<OAuth2ErrorBody>(body) {
            Ok(parsed) => Self {
                status: Some(status),
                error: Some(parsed.error),
                error_description: parsed.error_description,
                body: None,
            },
            Err(_) => Self {
                status: Some(status),
                error: None,
                error_description: None,
                body: (!body.is_empty()).then(|| body.to_string()),
            },
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            error_description: Some(reason.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "HTTP {}", status)?;
        } else {
            write!(f, "invalid response")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        if let Some(description) = &self.error_description {
            write!(f, " ({})", description)?;
        }
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(access: &str, refresh: Option<&str>, expires_in: Option<u64>) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in,
            refresh_token: refresh.map(String::from),
            scope: None,
            id_token: Some("id-1".to_string()),
        }
    }

    #[test]
    fn test_issued_computes_absolute_expiry() {
        let now = Utc::now();
        let tokens = TokenSet::issued(response("AT1", Some("RT1"), Some(3600)), now).unwrap();

        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(tokens.expires_at, Some(now + Duration::seconds(3600)));
        assert!(!tokens.is_expired());
    }

    #[test]
    fn test_unrepresentable_lifetime_means_unknown_expiry() {
        let now = Utc::now();
        for expires_in in [1_000_000_000_000_000, i64::MAX as u64 + 1, u64::MAX] {
            let tokens = TokenSet::issued(response("AT1", None, Some(expires_in)), now).unwrap();
            assert_eq!(tokens.expires_at, None);
            assert!(!tokens.is_expired());
        }
    }

    #[test]
    fn test_issued_rejects_empty_access_token() {
        let result = TokenSet::issued(response("", None, None), Utc::now());
        assert!(matches!(result, Err(AuthFlowError::ExchangeFailed(_))));
    }

    #[test]
    fn test_rotated_retains_refresh_and_id_token() {
        let now = Utc::now();
        let current = TokenSet::issued(response("AT1", Some("RT1"), Some(60)), now).unwrap();

        let refresh = TokenResponse {
            access_token: "AT2".to_string(),
            token_type: None,
            expires_in: None,
            refresh_token: None,
            scope: None,
            id_token: None,
        };
        let next = current.rotated(refresh, now).unwrap();

        assert_eq!(next.access_token, "AT2");
        assert_eq!(next.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(next.id_token.as_deref(), Some("id-1"));
        assert_eq!(next.token_type, "Bearer");
        assert_eq!(next.expires_at, None);
    }

    #[test]
    fn test_rotated_takes_new_refresh_token() {
        let now = Utc::now();
        let current = TokenSet::issued(response("AT1", Some("RT1"), None), now).unwrap();
        let next = current
            .rotated(response("AT2", Some("RT2"), Some(10)), now)
            .unwrap();
        assert_eq!(next.refresh_token.as_deref(), Some("RT2"));
    }

    #[test]
    fn test_expires_within_leeway() {
        let now = Utc::now();
        let tokens = TokenSet::issued(response("AT1", None, Some(30)), now).unwrap();
        assert!(tokens.expires_within(Duration::seconds(60)));
        assert!(!tokens.expires_within(Duration::seconds(5)));

        let no_expiry = TokenSet::issued(response("AT1", None, None), now).unwrap();
        assert!(!no_expiry.expires_within(Duration::days(365)));
    }

    #[test]
    fn test_callback_params_from_url() {
        let params = CallbackParams::from_url(
            "http://localhost:3000/callback?code=abc&state=S%2B1&ignored=x",
        )
        .unwrap();
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("S+1"));
        assert_eq!(params.error, None);

        let denied = CallbackParams::from_query(
            "?error=access_denied&error_description=User+cancelled",
        );
        assert_eq!(denied.error.as_deref(), Some("access_denied"));
        assert_eq!(denied.error_description.as_deref(), Some("User cancelled"));

        assert!(matches!(
            CallbackParams::from_url("not a url"),
            Err(AuthFlowError::InvalidCallback)
        ));
    }

    #[test]
    fn test_provider_failure_parsing() {
        let failure = ProviderFailure::from_response(
            400,
            r#"{"error":"invalid_grant","error_description":"code expired"}"#,
        );
        assert_eq!(failure.error.as_deref(), Some("invalid_grant"));
        assert_eq!(failure.to_string(), "HTTP 400: invalid_grant (code expired)");

        let raw = ProviderFailure::from_response(502, "bad gateway");
        assert_eq!(raw.error, None);
        assert_eq!(raw.to_string(), "HTTP 502: bad gateway");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let tokens = TokenSet::issued(response("secret-at", Some("secret-rt"), None), Utc::now())
            .unwrap();
        let rendered = format!("{:?}", tokens);
        assert!(!rendered.contains("secret-at"));
        assert!(!rendered.contains("secret-rt"));

        let flow = PendingFlow::new("verifier-secret".to_string(), "state-secret".to_string());
        assert!(!format!("{:?}", flow).contains("secret"));
    }
}
