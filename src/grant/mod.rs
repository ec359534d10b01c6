pub mod keycloak;

use async_trait::async_trait;

use crate::errors::CollaboratorError;

/// Assigns roles in the external identity provider.
///
/// Contract: `assign` MUST be idempotent. The approve transition calls it
/// before committing locally, so a crash between the two leads to a retry that
/// assigns the same role again.
#[async_trait]
pub trait RoleGrantService: Send + Sync {
    async fn assign(&self, subject_id: &str, role: &str) -> Result<(), CollaboratorError>;
}

/// Grant service that only logs. Used when no identity provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingGrantService;

#[async_trait]
impl RoleGrantService for LoggingGrantService {
    async fn assign(&self, subject_id: &str, role: &str) -> Result<(), CollaboratorError> {
        tracing::warn!(
            subject_id,
            role,
            "no identity provider configured; role assignment only logged"
        );
        Ok(())
    }
}
