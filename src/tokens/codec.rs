//! HS256 signing and verification of approval tokens.
//!
//! Expiry is NOT checked here: the validator compares `exp` against the
//! injected clock so tests can step time deterministically.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use zeroize::Zeroizing;

use crate::errors::ValidationError;
use crate::models::token::TokenClaims;

pub struct TokenCodec {
    secret: Zeroizing<Vec<u8>>,
    issuer: String,
}

impl TokenCodec {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
            issuer: issuer.to_string(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign(&self, claims: &TokenClaims) -> anyhow::Result<String> {
        let token = encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )?;
        Ok(token)
    }

    /// Verify signature, algorithm, issuer and presence of every claim.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, ValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);

        decode::<TokenClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token verification failed");
                ValidationError::Malformed
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claims(iss: &str) -> TokenClaims {
        TokenClaims {
            jti: Uuid::new_v4().to_string(),
            request_id: Uuid::new_v4(),
            action: crate::models::token::TokenAction::Approve,
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            iss: iss.to_string(),
        }
    }

    #[test]
    fn test_sign_verify_preserves_claims() {
        let codec = TokenCodec::new("s3cret", "iam-email-service");
        let c = claims("iam-email-service");
        let token = codec.sign(&c).unwrap();
        // past exp is fine at this layer
        assert_eq!(codec.verify(&token).unwrap(), c);
    }

    #[test]
    fn test_wrong_secret_is_malformed() {
        let signer = TokenCodec::new("s3cret", "iam-email-service");
        let verifier = TokenCodec::new("other", "iam-email-service");
        let token = signer.sign(&claims("iam-email-service")).unwrap();
        assert_eq!(verifier.verify(&token), Err(ValidationError::Malformed));
    }

    #[test]
    fn test_wrong_issuer_is_malformed() {
        let codec = TokenCodec::new("s3cret", "iam-email-service");
        let token = codec.sign(&claims("someone-else")).unwrap();
        assert_eq!(codec.verify(&token), Err(ValidationError::Malformed));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = TokenCodec::new("s3cret", "iam-email-service");
        assert_eq!(codec.verify("not.a.token"), Err(ValidationError::Malformed));
        assert_eq!(codec.verify(""), Err(ValidationError::Malformed));
    }

    #[test]
    fn test_missing_claim_is_malformed() {
        let codec = TokenCodec::new("s3cret", "iam-email-service");
        let partial = serde_json::json!({
            "request_id": Uuid::new_v4(),
            "action": "approve",
            "iat": 1_700_000_000i64,
            "exp": 1_700_003_600i64,
            "iss": "iam-email-service",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &partial,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        assert_eq!(codec.verify(&token), Err(ValidationError::Malformed));
    }
}
