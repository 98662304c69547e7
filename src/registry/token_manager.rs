//! Scope-bound bearer token cache
//!
//! Tokens are not expiry-tracked. A cached token is re-checked with a cheap
//! authorized probe before reuse, and replaced when the probe is rejected.

use crate::logging::Logger;
use crate::registry::auth::{Auth, AuthScheme};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Scope used for catalog listing
pub const CATALOG_SCOPE: &str = "registry:catalog:*";

/// Scope for read access to a repository
pub fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

/// Scope for every action on a repository, deletion included
pub fn delete_scope(repository: &str) -> String {
    format!("repository:{}:*", repository)
}

/// Thread-safe per-scope token cache
#[derive(Clone)]
pub struct TokenManager {
    auth: Auth,
    scheme: AuthScheme,
    tokens: Arc<RwLock<HashMap<String, String>>>,
    output: Logger,
}

impl TokenManager {
    pub fn new(auth: Auth, scheme: AuthScheme, output: Logger) -> Self {
        Self {
            auth,
            scheme,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            output,
        }
    }

    pub fn scheme(&self) -> &AuthScheme {
        &self.scheme
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Token for `scope`, empty when the scheme issues none or acquisition failed.
    ///
    /// An empty token lets the caller proceed unauthenticated; the registry then
    /// answers 401 and the request fails like any other.
    pub async fn get_token(&self, scope: &str) -> String {
        let AuthScheme::Bearer { realm, service } = &self.scheme else {
            return String::new();
        };

        if let Some(token) = self.cached(scope) {
            if self.auth.probe_token(&token).await {
                return token;
            }
            self.output
                .debug(&format!("Cached token for scope {} was rejected, renewing", scope));
        }

        match self
            .auth
            .request_token(realm, service, scope, &self.output)
            .await
        {
            Ok(token) => {
                if let Ok(mut guard) = self.tokens.write() {
                    guard.insert(scope.to_string(), token.clone());
                }
                token
            }
            Err(e) => {
                self.output
                    .error(&format!("Cannot obtain token for scope {}: {}", scope, e));
                String::new()
            }
        }
    }

    fn cached(&self, scope: &str) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|guard| guard.get(scope).cloned())
    }
}
