//! Login initiation: PKCE + state generation and the authorization redirect.

use crate::config::OAuth2ClientConfig;
use crate::error::OAuth2Result;
use crate::pkce::{self, PkceChallenge};
use crate::store::CredentialStore;
use crate::types::PendingFlow;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Hands control to another location: the identity provider's authorization
/// page when a login starts, the post-login destination once it completes.
///
/// Navigation is terminal for the caller's current context; implementations
/// do not report back.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Build the authorization URL for one login attempt.
pub fn build_authorization_url(
    config: &OAuth2ClientConfig,
    state: &str,
    code_challenge: &str,
) -> OAuth2Result<Url> {
    let mut url = config.authorization_url()?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("client_id", &config.client_id);
        params.append_pair("redirect_uri", &config.redirect_uri);
        params.append_pair("response_type", "code");
        params.append_pair("scope", &config.scope());
        params.append_pair("state", state);
        params.append_pair("code_challenge", code_challenge);
        params.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);

        // Provider-specific parameters
        for (key, value) in &config.auth_params {
            params.append_pair(key, value);
        }
    }

    Ok(url)
}

pub struct AuthorizationInitiator {
    config: Arc<OAuth2ClientConfig>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
}

impl AuthorizationInitiator {
    pub fn new(
        config: Arc<OAuth2ClientConfig>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            config,
            store,
            navigator,
        }
    }

    /// Start a login. Any earlier login that has not reached its callback
    /// yet is abandoned.
    pub async fn begin_login(&self) -> OAuth2Result<()> {
        let pkce = PkceChallenge::generate()?;
        let state = pkce::generate_state()?;
        let url = build_authorization_url(&self.config, &state, &pkce.code_challenge)?;

        if self.store.take_pending_flow().await.is_some() {
            debug!("Abandoning previous pending login flow");
        }
        self.store
            .put_pending_flow(PendingFlow::new(pkce.code_verifier, state))
            .await;

        info!(
            "Redirecting to authorization endpoint {}",
            self.config.authorization_endpoint
        );
        self.navigator.navigate(url.as_str());
        Ok(())
    }
}
