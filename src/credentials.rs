//! Bearer credentials for the storage backend.
//!
//! The transport asks the provider for a token on every call and calls
//! [`CredentialProvider::invalidate`] when the backend answers 401. The rejected
//! call is retried only when the provider reports that it can refresh.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

/// Source of the bearer token attached to backend requests
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Token for the next request, `None` to send the request unauthenticated
    async fn bearer_token(&self) -> Option<String>;

    /// The backend rejected the last token
    ///
    /// Returns whether a later [`bearer_token`](Self::bearer_token) call may yield a
    /// different token.
    async fn invalidate(&self) -> bool;
}

/// A fixed token that never changes
#[derive(Clone, Debug, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    /// Always send `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Send no Authorization header
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn invalidate(&self) -> bool {
        tracing::warn!("backend rejected the static bearer token");
        false
    }
}

/// A token slot the application refreshes (e.g. after a re-login)
///
/// Invalidation clears the slot; requests go out unauthenticated until
/// [`SharedToken::set`] stores a new token.
#[derive(Clone, Debug, Default)]
pub struct SharedToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Create a slot holding `token`
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    /// Replace the stored token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Current token without going through the provider trait
    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CredentialProvider for SharedToken {
    async fn bearer_token(&self) -> Option<String> {
        self.get()
    }

    async fn invalidate(&self) -> bool {
        tracing::warn!("bearer token rejected, clearing it");
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_survives_invalidation() {
        let provider = StaticToken::new("abc");
        assert!(!provider.invalidate().await);
        assert_eq!(provider.bearer_token().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn anonymous_sends_nothing() {
        assert_eq!(StaticToken::anonymous().bearer_token().await, None);
    }

    #[tokio::test]
    async fn shared_token_clears_and_refreshes() {
        let provider = SharedToken::new(Some("old".to_string()));
        let app_side = provider.clone();

        assert!(provider.invalidate().await);
        assert_eq!(provider.bearer_token().await, None);

        app_side.set("new");
        assert_eq!(provider.bearer_token().await.as_deref(), Some("new"));
    }
}
