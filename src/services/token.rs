//! Session token manager
//!
//! Issues the short-lived token a teacher displays for a class and decides
//! whether a presented token is still good. Validity is a pure comparison
//! against the class's stored token, so a regenerate wins over any scan that
//! is still carrying the previous value without any locking.

use crate::db::repositories::ClassRepository;
use crate::models::{Class, SessionToken};
use crate::services::clock::Clock;
use crate::services::payload::PayloadCodec;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Error types for token operations
#[derive(Debug, thiserror::Error)]
pub enum TokenServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A freshly issued token with everything a teacher screen shows
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub class_id: i64,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Scannable link
    pub uri: String,
    /// Same payload for typing by hand
    pub manual_code: String,
}

/// Issues and validates class session tokens
pub struct SessionTokenManager {
    classes: Arc<dyn ClassRepository>,
    clock: Arc<dyn Clock>,
    codec: PayloadCodec,
    ttl: Duration,
}

impl SessionTokenManager {
    pub fn new(
        classes: Arc<dyn ClassRepository>,
        clock: Arc<dyn Clock>,
        codec: PayloadCodec,
        ttl: Duration,
    ) -> Self {
        Self {
            classes,
            clock,
            codec,
            ttl,
        }
    }

    /// Issue a new token for a class, replacing the previous one.
    ///
    /// The old value stops validating the moment the update lands.
    ///
    /// # Errors
    /// - `NotFound` if the class doesn't exist
    pub async fn generate(&self, class_id: i64) -> Result<IssuedToken, TokenServiceError> {
        let issued_at = self.clock.now();
        let token = SessionToken {
            value: new_token_value(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };

        let replaced = self
            .classes
            .replace_token(class_id, &token)
            .await
            .context("Failed to store session token")?;
        if !replaced {
            return Err(TokenServiceError::NotFound(format!(
                "Class with ID {} not found",
                class_id
            )));
        }

        tracing::info!(class_id, expires_at = %token.expires_at, "Session token regenerated");

        Ok(IssuedToken {
            class_id,
            uri: self.codec.to_uri(class_id, &token.value),
            manual_code: self.codec.to_manual_code(class_id, &token.value),
            token: token.value,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
        })
    }
}

/// True iff the class has a token, `now` is before its expiry and the
/// presented value equals the stored one.
pub fn is_valid(class: &Class, token: &str, now: DateTime<Utc>) -> bool {
    match &class.token {
        Some(current) => current.is_live_at(now) && current.value == token,
        None => false,
    }
}

/// 32 lowercase hex characters
pub fn new_token_value() -> String {
    Uuid::new_v4().simple().to_string()
}
