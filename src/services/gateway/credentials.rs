//! Access credentials for authenticated gateway writes.

use async_trait::async_trait;
use dashmap::DashMap;

/// Supplies a currently valid access token for a wallet, or `None`.
///
/// Refresh and expiry are the provider's concern.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self, wallet_ref: &str) -> Option<String>;
}

/// Fixed wallet -> token map.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: DashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `wallet=token,wallet=token`. Malformed pairs are ignored.
    pub fn from_pairs(pairs: &str) -> Self {
        let creds = Self::new();
        for pair in pairs.split(',') {
            if let Some((wallet, token)) = pair.split_once('=') {
                let (wallet, token) = (wallet.trim(), token.trim());
                if !wallet.is_empty() && !token.is_empty() {
                    creds.insert(wallet, token);
                }
            }
        }
        creds
    }

    pub fn insert(&self, wallet_ref: &str, token: &str) {
        self.tokens
            .insert(wallet_ref.to_lowercase(), token.to_string());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self, wallet_ref: &str) -> Option<String> {
        self.tokens
            .get(&wallet_ref.to_lowercase())
            .map(|t| t.value().clone())
    }
}
