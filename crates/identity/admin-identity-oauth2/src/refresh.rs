//! Single-flight token refresh.
//!
//! The first caller starts the refresh on its own task and publishes a shared
//! handle to its outcome. Callers arriving while it runs await that handle
//! instead of posting to the token endpoint again, so one logical refresh
//! produces one request and one store update.

use crate::endpoint::TokenEndpoint;
use crate::error::{AuthFlowError, OAuth2Result};
use crate::store::CredentialStore;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, OAuth2Result<String>>>;

struct InFlight {
    outcome: SharedRefresh,
    task: AbortHandle,
}

impl InFlight {
    /// The task finishing, not the shared future being polled, ends a
    /// refresh: its callers may all have been dropped.
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct RefreshCoordinator {
    store: Arc<dyn CredentialStore>,
    endpoint: TokenEndpoint,
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshCoordinator {
    pub(crate) fn new(store: Arc<dyn CredentialStore>, endpoint: TokenEndpoint) -> Self {
        Self {
            store,
            endpoint,
            in_flight: Mutex::new(None),
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Any failure clears the stored tokens: the session cannot be salvaged
    /// and the user has to log in again.
    pub async fn refresh(&self) -> OAuth2Result<String> {
        let outcome = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(running) if running.is_running() => {
                    debug!("Attaching to in-flight token refresh");
                    running.outcome.clone()
                }
                _ => {
                    let started = self.start();
                    let outcome = started.outcome.clone();
                    *slot = Some(started);
                    outcome
                }
            }
        };

        outcome.await
    }

    /// Whether a refresh is currently running.
    pub async fn is_refreshing(&self) -> bool {
        matches!(self.in_flight.lock().await.as_ref(), Some(running) if running.is_running())
    }

    fn start(&self) -> InFlight {
        // Runs on its own task so a cancelled caller cannot abandon the
        // refresh between the provider call and the store update.
        let store = self.store.clone();
        let endpoint = self.endpoint.clone();
        let task = tokio::spawn(async move {
            match AssertUnwindSafe(run_refresh(store.clone(), endpoint))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("Token refresh panicked, clearing session tokens");
                    store.clear_tokens().await;
                    Err(AuthFlowError::RefreshRejected(
                        "refresh task panicked".to_string(),
                    ))
                }
            }
        });
        let abort_handle = task.abort_handle();

        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                Err(AuthFlowError::RefreshRejected(format!(
                    "refresh task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        InFlight {
            outcome,
            task: abort_handle,
        }
    }
}

async fn run_refresh(
    store: Arc<dyn CredentialStore>,
    endpoint: TokenEndpoint,
) -> OAuth2Result<String> {
    let current = store.get_tokens().await;
    let refresh_token = current
        .as_ref()
        .and_then(|tokens| tokens.refresh_token.clone())
        .filter(|token| !token.is_empty());

    let (Some(current), Some(refresh_token)) = (current, refresh_token) else {
        warn!("No refresh token stored, clearing session tokens");
        store.clear_tokens().await;
        return Err(AuthFlowError::NoRefreshToken);
    };

    let result = match endpoint.exchange_refresh_token(&refresh_token).await {
        Ok(response) => current.rotated(response, Utc::now()),
        Err(e) => Err(AuthFlowError::RefreshRejected(e.to_string())),
    };

    match result {
        Ok(next) => {
            let access_token = next.access_token.clone();
            debug!(
                "Refresh token {}",
                if next.refresh_token == current.refresh_token {
                    "retained"
                } else {
                    "rotated"
                }
            );
            store.put_tokens(next).await;
            info!("Access token refreshed");
            Ok(access_token)
        }
        Err(err) => {
            warn!("Token refresh failed, clearing session tokens: {}", err);
            store.clear_tokens().await;
            Err(err)
        }
    }
}
