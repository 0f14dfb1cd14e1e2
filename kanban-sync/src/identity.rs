//! Credential verification for the channel handshake.
//!
//! Token issuance lives elsewhere. The engine only asks one question:
//! which identity, if any, does this credential belong to?

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::IdentityError;
use crate::model::Identity;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for an unknown or expired credential, `Err` when the
    /// provider itself failed.
    async fn verify(&self, credential: &str) -> Result<Option<Identity>, IdentityError>;
}

/// Fixed token table.
///
/// Text form, one entry per comma: `token:user_id:email:display name`.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }

    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.into(), identity);
        }
    }

    /// Revoke a token. Connections already accepted keep their identity.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens
            .write()
            .map(|mut tokens| tokens.remove(token).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parse(table: &str) -> Result<Self, IdentityError> {
        let provider = Self::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(4, ':');
            let (Some(token), Some(user_id), Some(email), Some(name)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(IdentityError(format!("malformed token entry '{entry}'")));
            };
            let user_id = Uuid::parse_str(user_id)
                .map_err(|e| IdentityError(format!("bad user id in '{entry}': {e}")))?;
            provider.insert(token, Identity::new(user_id, email, name));
        }
        Ok(provider)
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn verify(&self, credential: &str) -> Result<Option<Identity>, IdentityError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| IdentityError("token table lock poisoned".into()))?;
        Ok(tokens.get(credential).cloned())
    }
}
