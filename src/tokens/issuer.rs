use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use super::codec::TokenCodec;
use crate::clock::Clock;
use crate::errors::StorageError;
use crate::models::token::{ApprovalToken, TokenAction, TokenClaims};
use crate::store::TokenStore;

/// An approve/reject token pair for one notification.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub approve: String,
    pub reject: String,
}

/// Mints signed tokens. The record is persisted before the token string is
/// handed out, so an unrecorded token never leaves this type.
#[derive(Clone)]
pub struct TokenIssuer {
    codec: Arc<TokenCodec>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(codec: Arc<TokenCodec>, store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { codec, store, clock }
    }

    pub async fn mint(
        &self,
        request_id: Uuid,
        action: TokenAction,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = TokenClaims {
            jti: jti.clone(),
            request_id,
            action,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.codec.issuer().to_string(),
        };
        let token = self
            .codec
            .sign(&claims)
            .map_err(|e| StorageError::Backend(format!("token signing failed: {}", e)))?;

        let record = ApprovalToken {
            jti: jti.clone(),
            request_id,
            action,
            created_at: now,
            expires_at,
            used_at: None,
        };
        self.store.insert_token(&record).await?;

        crate::metrics::token_event("minted");
        tracing::debug!(request_id = %request_id, jti = %jti, action = %action, "minted approval token");
        Ok(token)
    }

    pub async fn mint_pair(&self, request_id: Uuid, ttl: Duration) -> Result<TokenPair, StorageError> {
        let approve = self.mint(request_id, TokenAction::Approve, ttl).await?;
        let reject = self.mint(request_id, TokenAction::Reject, ttl).await?;
        Ok(TokenPair { approve, reject })
    }
}
