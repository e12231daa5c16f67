//! Access token sources.
//!
//! The manager reads the token once per connection attempt and never caches
//! it, so a rotated token is used on the next reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Key under which the access token is stored.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Supplies the current access token.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current token, if any.
    fn access_token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// Provider that never has a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn access_token(&self) -> Option<String> {
        None
    }
}

/// Provider returning a fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Creates a provider for the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"<redacted>").finish()
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Shared key/value store for session values such as the access token.
///
/// Clones share the same storage. The connection manager only reads
/// [`ACCESS_TOKEN_KEY`]; writers are the login and refresh flows.
#[derive(Clone, Default)]
pub struct TokenStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl TokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Removes the value stored under `key`.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    /// Stores the access token.
    pub fn set_access_token(&self, token: impl Into<String>) {
        self.set(ACCESS_TOKEN_KEY, token);
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.values.read().keys().cloned().collect();
        f.debug_struct("TokenStore").field("keys", &keys).finish()
    }
}

impl CredentialProvider for TokenStore {
    fn access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }
}
