//! Read-only view of the application's auth token.

use std::sync::{Arc, RwLock};

use crate::transport::HttpRequest;

/// Header carrying the token on every request the client issues.
pub const AUTH_HEADER: &str = "X-Auth";

/// Shared token slot. Cloning shares the slot; the owner of the application
/// state updates it, the upload client only reads it.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(Some(token.into()));
        store
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap() = token;
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    /// Attach the `X-Auth` header when a token is present.
    pub fn apply(&self, request: &mut dyn HttpRequest) {
        if let Some(token) = self.get() {
            request.set_header(AUTH_HEADER, &token);
        }
    }
}
