use super::types::{AuthenticationResult, TokenScope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct TokenStoreState {
    default_token: Option<AuthenticationResult>,
    tokens_by_subscription: HashMap<String, AuthenticationResult>,
}

/// Process-wide holder of the default token and the per-subscription tokens.
///
/// Cloning yields another handle to the same state, so one store can be
/// shared between every executor that runs management calls.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<TokenStoreState>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn default_token(&self) -> Option<AuthenticationResult> {
        self.inner.read().await.default_token.clone()
    }

    pub async fn set_default_token(&self, token: Option<AuthenticationResult>) {
        self.inner.write().await.default_token = token;
    }

    pub async fn token_for_subscription(
        &self,
        subscription_id: &str,
    ) -> Option<AuthenticationResult> {
        self.inner
            .read()
            .await
            .tokens_by_subscription
            .get(subscription_id)
            .cloned()
    }

    pub async fn set_token_for_subscription(
        &self,
        subscription_id: String,
        token: AuthenticationResult,
    ) {
        self.inner
            .write()
            .await
            .tokens_by_subscription
            .insert(subscription_id, token);
    }

    pub async fn get(&self, scope: &TokenScope) -> Option<AuthenticationResult> {
        match scope {
            TokenScope::Tenant => self.default_token().await,
            TokenScope::Subscription(id) => self.token_for_subscription(id).await,
        }
    }

    /// Replaces the token for `scope`.
    pub async fn store(&self, scope: &TokenScope, token: AuthenticationResult) {
        match scope {
            TokenScope::Tenant => self.set_default_token(Some(token)).await,
            TokenScope::Subscription(id) => {
                self.set_token_for_subscription(id.clone(), token).await
            }
        }
    }

    /// Forgets the token for `scope` so the next call signs in again.
    pub async fn invalidate(&self, scope: &TokenScope) {
        let mut state = self.inner.write().await;
        match scope {
            TokenScope::Tenant => state.default_token = None,
            TokenScope::Subscription(id) => {
                state.tokens_by_subscription.remove(id);
            }
        }
    }

    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.default_token = None;
        state.tokens_by_subscription.clear();
    }

    pub async fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .await
            .tokens_by_subscription
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
