//! Bearer-authenticated HTTP requests with one refresh-and-retry on 401.

use crate::error::AuthFlowError;
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;
use reqwest::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request was rejected with 401 and the session could not be
    /// refreshed. The user has to log in again.
    #[error("Authentication required: {0}")]
    Unauthorized(AuthFlowError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A 401 needed a retry but the request body is a stream that cannot be
    /// sent twice.
    #[error("Request body cannot be replayed for the authenticated retry")]
    UnclonableRequest,

    #[error("Access token is not a valid header value: {0}")]
    InvalidToken(#[from] InvalidHeaderValue),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Wraps outbound API calls with the session's access token.
///
/// A 401 triggers one refresh through the shared [`RefreshCoordinator`] and
/// one resend. The resend is never retried again, whatever its status.
#[derive(Clone)]
pub struct AuthenticatedGateway {
    http_client: Client,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
}

impl AuthenticatedGateway {
    pub(crate) fn new(
        http_client: Client,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http_client,
            store,
            refresher,
        }
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http_client.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Build and execute a request obtained from one of the builder methods.
    pub async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        self.execute(builder.build()?).await
    }

    pub async fn execute(&self, request: Request) -> GatewayResult<Response> {
        let replay = request.try_clone();
        let sent_token = self.current_token().await;

        let response = self.dispatch(request, sent_token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("{} returned 401, refreshing before one retry", response.url());
        let replay = replay.ok_or(GatewayError::UnclonableRequest)?;

        // Another caller may already have refreshed since this request went out
        let token = match self.current_token().await {
            Some(stored) if sent_token.as_deref() != Some(stored.as_str()) => stored,
            _ => self
                .refresher
                .refresh()
                .await
                .map_err(GatewayError::Unauthorized)?,
        };

        let retried = self.dispatch(replay, Some(&token)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!("{} still returned 401 after refresh", retried.url());
        }
        Ok(retried)
    }

    async fn current_token(&self) -> Option<String> {
        self.store
            .get_tokens()
            .await
            .map(|tokens| tokens.access_token)
    }

    async fn dispatch(&self, mut request: Request, token: Option<&str>) -> GatewayResult<Response> {
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(self.http_client.execute(request).await?)
    }
}
