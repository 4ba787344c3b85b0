//! Session-scoped credential storage.

use crate::types::{PendingFlow, TokenSet};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage for the pending login flow and the issued tokens of one session.
///
/// Implementations must make every operation atomic: a reader never
/// observes a half-written token set, and `take_pending_flow` hands a given
/// flow to at most one caller.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store the pending flow, replacing any earlier uncompleted one.
    async fn put_pending_flow(&self, flow: PendingFlow);

    /// Remove and return the pending flow.
    async fn take_pending_flow(&self) -> Option<PendingFlow>;

    async fn put_tokens(&self, tokens: TokenSet);

    async fn get_tokens(&self) -> Option<TokenSet>;

    async fn clear_tokens(&self);

    /// Drop everything the session holds.
    async fn clear(&self) {
        self.take_pending_flow().await;
        self.clear_tokens().await;
    }
}

#[derive(Default)]
struct Slots {
    pending: Option<PendingFlow>,
    tokens: Option<TokenSet>,
}

/// In-memory implementation of CredentialStore. Its contents live exactly
/// as long as the store value.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    slots: Arc<RwLock<Slots>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn put_pending_flow(&self, flow: PendingFlow) {
        self.slots.write().await.pending = Some(flow);
    }

    async fn take_pending_flow(&self) -> Option<PendingFlow> {
        self.slots.write().await.pending.take()
    }

    async fn put_tokens(&self, tokens: TokenSet) {
        self.slots.write().await.tokens = Some(tokens);
    }

    async fn get_tokens(&self) -> Option<TokenSet> {
        self.slots.read().await.tokens.clone()
    }

    async fn clear_tokens(&self) {
        self.slots.write().await.tokens = None;
    }

    async fn clear(&self) {
        let mut slots = self.slots.write().await;
        slots.pending = None;
        slots.tokens = None;
    }
}
