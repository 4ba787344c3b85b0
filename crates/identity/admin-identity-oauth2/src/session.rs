//! Owned authentication session.

use crate::callback::{CallbackResolver, CallbackState};
use crate::config::OAuth2ClientConfig;
use crate::endpoint::TokenEndpoint;
use crate::error::{AuthFlowError, OAuth2Result};
use crate::gateway::AuthenticatedGateway;
use crate::initiator::{AuthorizationInitiator, Navigator};
use crate::refresh::RefreshCoordinator;
use crate::store::{CredentialStore, InMemoryCredentialStore};
use crate::types::{CallbackParams, TokenSet};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info};

/// One user's authentication session.
///
/// Owns the credential store and the single refresh coordinator every
/// request path shares. Dropping the session (or calling [`logout`]) ends
/// it; nothing about it is process-global.
///
/// [`logout`]: AuthSession::logout
pub struct AuthSession {
    config: Arc<OAuth2ClientConfig>,
    store: Arc<dyn CredentialStore>,
    initiator: AuthorizationInitiator,
    resolver: CallbackResolver,
    refresher: Arc<RefreshCoordinator>,
    gateway: AuthenticatedGateway,
}

impl AuthSession {
    /// Create a session backed by an in-memory store.
    pub fn new(config: OAuth2ClientConfig, navigator: Arc<dyn Navigator>) -> OAuth2Result<Self> {
        Self::with_store(config, Arc::new(InMemoryCredentialStore::new()), navigator)
    }

    pub fn with_store(
        config: OAuth2ClientConfig,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> OAuth2Result<Self> {
        let http_client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| AuthFlowError::ConfigError(format!("HTTP client: {}", e)))?;

        Self::with_http_client(config, store, navigator, http_client)
    }

    /// Use a caller-provided HTTP client for both the token endpoint and
    /// gateway requests.
    pub fn with_http_client(
        config: OAuth2ClientConfig,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        http_client: Client,
    ) -> OAuth2Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let endpoint = TokenEndpoint::new(
            http_client.clone(),
            config.token_url()?,
            config.client_id.clone(),
        );
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), endpoint.clone()));

        debug!("Created auth session for client {}", config.client_id);

        Ok(Self {
            initiator: AuthorizationInitiator::new(config.clone(), store.clone(), navigator.clone()),
            resolver: CallbackResolver::new(config.clone(), store.clone(), endpoint, navigator),
            gateway: AuthenticatedGateway::new(http_client, store.clone(), refresher.clone()),
            refresher,
            store,
            config,
        })
    }

    pub fn config(&self) -> &OAuth2ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub async fn begin_login(&self) -> OAuth2Result<()> {
        self.initiator.begin_login().await
    }

    pub async fn resolve_callback(&self, callback_url: &str) -> OAuth2Result<TokenSet> {
        self.resolver.resolve_url(callback_url).await
    }

    pub async fn resolve_callback_params(&self, params: CallbackParams) -> OAuth2Result<TokenSet> {
        self.resolver.resolve(params).await
    }

    pub fn callback_state(&self) -> CallbackState {
        self.resolver.state()
    }

    pub async fn refresh(&self) -> OAuth2Result<String> {
        self.refresher.refresh().await
    }

    /// Current access token, refreshed first when it expires within the
    /// configured leeway. `None` when the session is not logged in.
    pub async fn access_token(&self) -> OAuth2Result<Option<String>> {
        let Some(tokens) = self.store.get_tokens().await else {
            return Ok(None);
        };

        if tokens.expires_within(self.config.expiry_leeway()) {
            debug!("Access token expires within leeway, refreshing");
            return self.refresh().await.map(Some);
        }

        Ok(Some(tokens.access_token))
    }

    pub async fn tokens(&self) -> Option<TokenSet> {
        self.store.get_tokens().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store
            .get_tokens()
            .await
            .is_some_and(|tokens| !tokens.is_expired())
    }

    pub fn gateway(&self) -> AuthenticatedGateway {
        self.gateway.clone()
    }

    /// Drop the pending flow and all tokens.
    pub async fn logout(&self) {
        self.store.clear().await;
        info!("Logged out");
    }
}
