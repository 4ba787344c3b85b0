//! Authentication flow error types.

use crate::types::ProviderFailure;
use thiserror::Error;

pub type OAuth2Result<T> = Result<T, AuthFlowError>;

/// Terminal outcomes of the login, callback and refresh flows.
///
/// The type is `Clone` because a single refresh outcome is handed to every
/// caller that attached to the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFlowError {
    /// The identity provider redirected back with an `error` parameter.
    #[error("Provider denied authorization: {error}{}", describe(.description))]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    /// The callback carried neither `code` nor `error`.
    #[error("Invalid callback: no code or error parameter")]
    InvalidCallback,

    /// No pending login flow matched this callback (replayed, expired or never started).
    #[error("Expired or duplicate callback")]
    ExpiredOrDuplicateFlow,

    #[error("State mismatch: possible CSRF")]
    StateMismatch,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(ProviderFailure),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl AuthFlowError {
    /// Errors after which every stored secret must be gone.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            AuthFlowError::StateMismatch
                | AuthFlowError::NoRefreshToken
                | AuthFlowError::RefreshRejected(_)
        )
    }

    /// Whether the user has to start a new login to recover.
    pub fn requires_login(&self) -> bool {
        !matches!(self, AuthFlowError::ConfigError(_))
    }
}

fn describe(description: &Option<String>) -> String {
    match description {
        Some(text) => format!(" ({})", text),
        None => String::new(),
    }
}
