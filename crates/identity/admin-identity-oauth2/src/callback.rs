//! Callback resolution as an explicit state machine.
//!
//! `Idle -> Validating -> Exchanging -> Authenticated | Failed`
//!
//! Every failure leaves through [`CallbackResolver::fail`], which discards
//! the pending flow and, for security-relevant failures, the token set. No
//! branch does its own cleanup.

use crate::config::OAuth2ClientConfig;
use crate::endpoint::{TokenEndpoint, TokenEndpointError};
use crate::error::{AuthFlowError, OAuth2Result};
use crate::initiator::Navigator;
use crate::store::CredentialStore;
use crate::types::{CallbackParams, TokenSet};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackState {
    Idle,
    Validating,
    Exchanging,
    Authenticated,
    Failed(AuthFlowError),
}

impl CallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallbackState::Authenticated | CallbackState::Failed(_))
    }
}

pub struct CallbackResolver {
    config: Arc<OAuth2ClientConfig>,
    store: Arc<dyn CredentialStore>,
    endpoint: TokenEndpoint,
    navigator: Arc<dyn Navigator>,
    state: watch::Sender<CallbackState>,
}

impl CallbackResolver {
    pub(crate) fn new(
        config: Arc<OAuth2ClientConfig>,
        store: Arc<dyn CredentialStore>,
        endpoint: TokenEndpoint,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (state, _) = watch::channel(CallbackState::Idle);
        Self {
            config,
            store,
            endpoint,
            navigator,
            state,
        }
    }

    /// State reached by the most recent resolution.
    pub fn state(&self) -> CallbackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallbackState> {
        self.state.subscribe()
    }

    /// Resolve the full callback URL the provider redirected to.
    pub async fn resolve_url(&self, callback_url: &str) -> OAuth2Result<TokenSet> {
        match CallbackParams::from_url(callback_url) {
            Ok(params) => self.resolve(params).await,
            Err(err) => {
                self.enter(CallbackState::Validating);
                Err(self.fail(err).await)
            }
        }
    }

    /// Resolve the callback parameters. On success the tokens are stored and
    /// control is handed to the post-login destination.
    pub async fn resolve(&self, params: CallbackParams) -> OAuth2Result<TokenSet> {
        self.enter(CallbackState::Validating);

        match self.validate_and_exchange(params).await {
            Ok(tokens) => {
                self.enter(CallbackState::Authenticated);
                info!("Login completed");
                self.navigator.navigate(&self.config.post_login_redirect);
                Ok(tokens)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn validate_and_exchange(&self, params: CallbackParams) -> OAuth2Result<TokenSet> {
        if let Some(error) = params.error {
            return Err(AuthFlowError::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(AuthFlowError::InvalidCallback)?;

        let flow = match self.store.take_pending_flow().await {
            Some(flow) if flow.is_expired(self.config.pending_flow_ttl()) => {
                debug!("Pending flow from {} has expired", flow.created_at);
                None
            }
            other => other,
        }
        .ok_or(AuthFlowError::ExpiredOrDuplicateFlow)?;

        let received_state = params.state.unwrap_or_default();
        if flow.state.is_empty() || received_state != flow.state {
            return Err(AuthFlowError::StateMismatch);
        }

        self.enter(CallbackState::Exchanging);
        let response = self
            .endpoint
            .exchange_code(&code, &flow.verifier, &self.config.redirect_uri)
            .await
            .map_err(|e| match e {
                TokenEndpointError::Transport(msg) => AuthFlowError::NetworkError(msg),
                TokenEndpointError::Rejected(failure) => AuthFlowError::ExchangeFailed(failure),
            })?;

        let tokens = TokenSet::issued(response, Utc::now())?;
        self.store.put_tokens(tokens.clone()).await;
        Ok(tokens)
    }

    async fn fail(&self, err: AuthFlowError) -> AuthFlowError {
        self.store.take_pending_flow().await;
        if err.is_security_relevant() {
            warn!("Callback rejected: {}", err);
            self.store.clear_tokens().await;
        } else {
            debug!("Callback failed: {}", err);
        }
        self.enter(CallbackState::Failed(err.clone()));
        err
    }

    fn enter(&self, next: CallbackState) {
        let previous = self.state.send_replace(next);
        debug!("Callback state {:?} -> {:?}", previous, *self.state.borrow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initiator::testing::RecordingNavigator;
    use crate::store::InMemoryCredentialStore;
    use crate::types::PendingFlow;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        server: MockServer,
        store: Arc<InMemoryCredentialStore>,
        navigator: Arc<RecordingNavigator>,
        resolver: CallbackResolver,
    }

    async fn fixture() -> Fixture {
        let server = MockServer::start().await;
        let config = OAuth2ClientConfig::new(
            "admin-ui",
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
            "http://localhost:3000/callback",
        );
        let store = Arc::new(InMemoryCredentialStore::new());
        let navigator = Arc::new(RecordingNavigator::default());
        let endpoint = TokenEndpoint::new(
            reqwest::Client::new(),
            Url::parse(&config.token_endpoint).unwrap(),
            config.client_id.clone(),
        );
        let resolver =
            CallbackResolver::new(Arc::new(config), store.clone(), endpoint, navigator.clone());

        Fixture {
            server,
            store,
            navigator,
            resolver,
        }
    }

    const STATE: &str = "Nq3vV0e~sT4kR8xY_pL2mZ.aB6cD9fG1";

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            ..CallbackParams::default()
        }
    }

    #[tokio::test]
    async fn test_provider_error_skips_exchange() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&f.server)
            .await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let err = f
            .resolver
            .resolve_url("http://localhost:3000/callback?error=access_denied&error_description=nope")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthFlowError::ProviderDenied {
                error: "access_denied".to_string(),
                description: Some("nope".to_string()),
            }
        );
        assert_eq!(f.resolver.state(), CallbackState::Failed(err));
        assert!(f.store.take_pending_flow().await.is_none());
        assert!(f.navigator.visited().is_empty());
    }

    #[tokio::test]
    async fn test_missing_code_is_invalid_callback() {
        let f = fixture().await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let err = f.resolver.resolve(params(None, Some(STATE))).await;
        assert_eq!(err, Err(AuthFlowError::InvalidCallback));

        let err = f.resolver.resolve(params(Some(""), None)).await;
        assert_eq!(err, Err(AuthFlowError::InvalidCallback));

        assert!(f.store.take_pending_flow().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_stored_state_fails_closed() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&f.server)
            .await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), String::new()))
            .await;

        let result = f.resolver.resolve(params(Some("abc"), Some(""))).await;
        assert_eq!(result, Err(AuthFlowError::StateMismatch));
    }

    #[tokio::test]
    async fn test_expired_flow_treated_as_absent() {
        let f = fixture().await;
        let mut flow = PendingFlow::new("v".repeat(43), STATE.to_string());
        flow.created_at = Utc::now() - chrono::Duration::hours(1);
        f.store.put_pending_flow(flow).await;

        let result = f
            .resolver
            .resolve(params(Some("abc"), Some(STATE)))
            .await;
        assert_eq!(result, Err(AuthFlowError::ExpiredOrDuplicateFlow));
    }

    #[tokio::test]
    async fn test_exchange_failure_carries_provider_payload() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .expect(1)
            .mount(&f.server)
            .await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let err = f
            .resolver
            .resolve(params(Some("abc"), Some(STATE)))
            .await
            .unwrap_err();

        match err {
            AuthFlowError::ExchangeFailed(failure) => {
                assert_eq!(failure.status, Some(400));
                assert_eq!(failure.error.as_deref(), Some("invalid_grant"));
                assert_eq!(failure.error_description.as_deref(), Some("code expired"));
            }
            other => panic!("Expected ExchangeFailed, got {:?}", other),
        }
        assert!(f.store.get_tokens().await.is_none());
        assert!(f.store.take_pending_flow().await.is_none());
    }

    #[tokio::test]
    async fn test_success_navigates_to_post_login_destination() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT1",
                "id_token": "ID1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&f.server)
            .await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let mut states = f.resolver.subscribe();
        let tokens = f
            .resolver
            .resolve(params(Some("abc"), Some(STATE)))
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.id_token.as_deref(), Some("ID1"));
        assert_eq!(tokens.refresh_token, None);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), CallbackState::Authenticated);
        assert!(f.resolver.state().is_terminal());
        assert_eq!(f.navigator.last().as_deref(), Some("/home"));
    }

    #[tokio::test]
    async fn test_oversized_expires_in_still_authenticates() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT1",
                "refresh_token": "RT1",
                "expires_in": u64::MAX
            })))
            .expect(1)
            .mount(&f.server)
            .await;
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let tokens = f
            .resolver
            .resolve(params(Some("abc"), Some(STATE)))
            .await
            .unwrap();

        assert_eq!(tokens.expires_at, None);
        assert_eq!(f.store.get_tokens().await, Some(tokens));
        assert_eq!(f.resolver.state(), CallbackState::Authenticated);
    }

    #[tokio::test]
    async fn test_network_error_on_exchange() {
        let f = fixture().await;
        let unreachable = TokenEndpoint::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:1/token").unwrap(),
            "admin-ui".to_string(),
        );
        let resolver = CallbackResolver::new(
            Arc::new(OAuth2ClientConfig::new(
                "admin-ui",
                format!("{}/authorize", f.server.uri()),
                "http://127.0.0.1:1/token",
                "http://localhost:3000/callback",
            )),
            f.store.clone(),
            unreachable,
            f.navigator.clone(),
        );
        f.store
            .put_pending_flow(PendingFlow::new("v".repeat(43), STATE.to_string()))
            .await;

        let result = resolver
            .resolve(params(Some("abc"), Some(STATE)))
            .await;
        assert!(matches!(result, Err(AuthFlowError::NetworkError(_))));
        assert!(f.store.take_pending_flow().await.is_none());
    }
}
