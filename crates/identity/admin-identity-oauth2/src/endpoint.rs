//! Token endpoint client for the `authorization_code` and `refresh_token` grants.

use crate::types::{ProviderFailure, TokenResponse};
use reqwest::Client;
use std::fmt;
use tracing::{debug, error};
use url::Url;

/// Why a token endpoint call did not produce a token response.
#[derive(Debug)]
pub(crate) enum TokenEndpointError {
    /// The request never got an HTTP response
    Transport(String),
    /// Non-success status, or a success body that is not a token response
    Rejected(ProviderFailure),
}

impl fmt::Display for TokenEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenEndpointError::Transport(msg) => write!(f, "transport error: {}", msg),
            TokenEndpointError::Rejected(failure) => write!(f, "{}", failure),
        }
    }
}

#[derive(Clone)]
pub(crate) struct TokenEndpoint {
    http_client: Client,
    token_url: Url,
    client_id: String,
}

impl TokenEndpoint {
    pub(crate) fn new(http_client: Client, token_url: Url, client_id: String) -> Self {
        Self {
            http_client,
            token_url,
            client_id,
        }
    }

    pub(crate) async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        debug!("Exchanging authorization code at {}", self.token_url);
        self.post(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("code", code),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    pub(crate) async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        debug!("Exchanging refresh token at {}", self.token_url);
        self.post(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn post(&self, form: &[(&str, &str)]) -> Result<TokenResponse, TokenEndpointError> {
        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| TokenEndpointError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenEndpointError::Transport(e.to_string()))?;

        if !status.is_success() {
            let failure = ProviderFailure::from_response(status.as_u16(), &body);
            error!("Token endpoint returned {}", failure);
            return Err(TokenEndpointError::Rejected(failure));
        }

        serde_json::from_str::<TokenResponse>(&body).map_err(|e| {
            error!("Token endpoint returned an unparseable body: {}", e);
            TokenEndpointError::Rejected(ProviderFailure {
                status: Some(status.as_u16()),
                error_description: Some(format!("invalid token response: {}", e)),
                ..ProviderFailure::default()
            })
        })
    }
}
