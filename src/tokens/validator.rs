use std::sync::Arc;

use super::codec::TokenCodec;
use crate::clock::Clock;
use crate::errors::{ValidationError, WorkflowError};
use crate::models::token::TokenClaims;
use crate::store::TokenStore;

/// Two-phase token check.
///
/// [`TokenValidator::validate`] is read-only. [`TokenValidator::redeem`] is the
/// one conditional write; a token that validated can still lose the race to
/// redeem, and that loser gets `Replayed`.
#[derive(Clone)]
pub struct TokenValidator {
    codec: Arc<TokenCodec>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl TokenValidator {
    pub fn new(codec: Arc<TokenCodec>, store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { codec, store, clock }
    }

    pub async fn validate(&self, token: &str) -> Result<TokenClaims, WorkflowError> {
        let claims = self.codec.verify(token).map_err(|e| {
            crate::metrics::token_event("rejected");
            e
        })?;
        let now = self.clock.now();

        if claims.exp <= now.timestamp() {
            crate::metrics::token_event("rejected");
            return Err(ValidationError::Expired.into());
        }

        let Some(record) = self.store.get_token(&claims.jti).await? else {
            tracing::warn!(jti = %claims.jti, "token signature valid but no persisted record");
            crate::metrics::token_event("rejected");
            return Err(ValidationError::Unknown.into());
        };

        if record.request_id != claims.request_id || record.action != claims.action {
            tracing::warn!(jti = %claims.jti, "token claims disagree with persisted record");
            crate::metrics::token_event("rejected");
            return Err(ValidationError::Malformed.into());
        }
        if record.is_used() {
            crate::metrics::token_event("rejected");
            return Err(ValidationError::Replayed.into());
        }
        if record.is_expired_at(now) {
            crate::metrics::token_event("rejected");
            return Err(ValidationError::Expired.into());
        }

        Ok(claims)
    }

    pub async fn redeem(&self, jti: &str) -> Result<(), WorkflowError> {
        let now = self.clock.now();
        if self.store.mark_token_used(jti, now).await? {
            crate::metrics::token_event("redeemed");
            tracing::info!(jti = %jti, "token redeemed");
            Ok(())
        } else {
            crate::metrics::token_event("rejected");
            tracing::warn!(jti = %jti, "token redemption lost: already used");
            Err(ValidationError::Replayed.into())
        }
    }
}
