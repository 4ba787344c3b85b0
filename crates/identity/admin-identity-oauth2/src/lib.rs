//! OAuth2 Authorization Code + PKCE client for the admin dashboard.
//!
//! This crate runs the public-client side of the login: it starts the flow with
//! a fresh verifier/state pair, resolves the provider's callback through an
//! explicit state machine, refreshes tokens through a single-flight coordinator,
//! and wraps API calls in a gateway that attaches the bearer token and retries
//! once after a 401. [`AuthSession`] ties the pieces together around one
//! injectable [`CredentialStore`].

mod callback;
mod config;
mod endpoint;
mod error;
mod gateway;
mod initiator;
pub mod pkce;
mod refresh;
mod session;
mod store;
mod types;


pub use callback::{CallbackResolver, CallbackState};
pub use config::OAuth2ClientConfig;
pub use error::{AuthFlowError, OAuth2Result};
pub use gateway::{AuthenticatedGateway, GatewayError, GatewayResult};
pub use initiator::{AuthorizationInitiator, Navigator, build_authorization_url};
pub use pkce::PkceChallenge;
pub use refresh::RefreshCoordinator;
pub use session::AuthSession;
pub use store::{CredentialStore, InMemoryCredentialStore};
pub use types::{CallbackParams, PendingFlow, ProviderFailure, TokenResponse, TokenSet};
