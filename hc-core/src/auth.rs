//! Authentication collaborator interface.
//!
//! The transport never performs a login itself. It asks an `AuthProvider`
//! whether a session exists and which bearer token to present.

use std::sync::RwLock;

/// Source of authentication state for the transport.
pub trait AuthProvider: Send + Sync {
    /// Whether a user session is currently established.
    fn is_authenticated(&self) -> bool;

    /// The bearer token for the current session, if any.
    fn auth_token(&self) -> Option<String>;
}

/// An `AuthProvider` holding a token in memory.
///
/// Used by the CLI (token from config) and by tests. An empty or cleared
/// token means "not authenticated".
#[derive(Debug, Default)]
pub struct StaticAuth {
    token: RwLock<Option<String>>,
}

impl StaticAuth {
    /// Create a provider that is authenticated with `token`.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: RwLock::new((!token.is_empty()).then_some(token)),
        }
    }

    /// Create a provider with no session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the current token.
    pub fn set_token(&self, token: Option<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token.filter(|t| !t.is_empty());
    }

    /// Drop the current session.
    pub fn clear(&self) {
        self.set_token(None);
    }
}

impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.auth_token().is_some()
    }

    fn auth_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
