//! Service authentication.
//!
//! Every endpoint except health requires one of:
//! - `Authorization: Bearer <CRON_SECRET>`
//! - `x-agent-key: <TRUSTED_AGENT_KEY>`
//!
//! With neither configured, protected endpoints reject everything.

use axum::{extract::FromRequestParts, http::request::Parts};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::AppError;
use crate::AppState;

pub const AGENT_KEY_HEADER: &str = "x-agent-key";

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCaller {
    Cron,
    Agent,
}

/// Extractor that admits only the cron scheduler or a trusted agent.
#[derive(Debug, Clone, Copy)]
pub struct ServiceAuth {
    pub caller: ServiceCaller,
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compare fixed-length digests so the check does not leak the secret's length.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = digest(provided);
    let b = digest(expected);
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[axum::async_trait]
impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if let (Some(token), Some(secret)) = (bearer, state.config.cron_secret.as_deref()) {
            if secrets_match(token.trim(), secret) {
                return Ok(ServiceAuth {
                    caller: ServiceCaller::Cron,
                });
            }
        }

        let agent_key = parts
            .headers
            .get(AGENT_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if let (Some(key), Some(expected)) = (agent_key, state.config.trusted_agent_key.as_deref()) {
            if secrets_match(key.trim(), expected) {
                return Ok(ServiceAuth {
                    caller: ServiceCaller::Agent,
                });
            }
        }

        warn!("Rejected unauthenticated request to {}", parts.uri.path());
        Err(AppError::Unauthorized)
    }
}
