//! Credential Providers
//!
//! Tokens are resolved lazily, once per remote call, so a sign-in that
//! happens mid-session is picked up by the next fetch.

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Source of the bearer token sent to the remote services
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current credential, or `None` for anonymous access
    async fn get_token(&self) -> Option<String>;
}

/// Anonymous access
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn get_token(&self) -> Option<String> {
        None
    }
}

/// A token that can be swapped at runtime (sign-in, sign-out, renewal)
#[derive(Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub async fn set(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}
