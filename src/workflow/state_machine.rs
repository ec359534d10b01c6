use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{StateError, WorkflowError};
use crate::grant::RoleGrantService;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::store::RequestStore;

/// Owns every status change of an access request.
///
/// All transitions leave `pending` and are committed with a conditional
/// update, so of two racing transitions exactly one commits and the other
/// gets [`StateError::NotPending`].
#[derive(Clone)]
pub struct RequestStateMachine {
    store: Arc<dyn RequestStore>,
    grant: Arc<dyn RoleGrantService>,
    clock: Arc<dyn Clock>,
}

impl RequestStateMachine {
    pub fn new(
        store: Arc<dyn RequestStore>,
        grant: Arc<dyn RoleGrantService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, grant, clock }
    }

    /// Grant the role, then commit `approved`. A grant failure leaves the
    /// request pending.
    pub async fn approve(&self, request_id: Uuid) -> Result<AccessRequest, WorkflowError> {
        let request = self.load_pending(request_id).await?;

        if let Err(e) = self
            .grant
            .assign(&request.subject_id, &request.requested_role)
            .await
        {
            tracing::error!(
                request_id = %request_id,
                subject_id = %request.subject_id,
                role = %request.requested_role,
                error = %e,
                "role grant failed, request stays pending"
            );
            return Err(e.into());
        }

        self.commit(request, RequestStatus::Approved).await
    }

    pub async fn reject(&self, request_id: Uuid) -> Result<AccessRequest, WorkflowError> {
        let request = self.load_pending(request_id).await?;
        self.commit(request, RequestStatus::Rejected).await
    }

    pub async fn expire(&self, request_id: Uuid) -> Result<AccessRequest, WorkflowError> {
        let request = self.load_pending(request_id).await?;
        self.commit(request, RequestStatus::Expired).await
    }

    pub async fn mark_error(&self, request_id: Uuid) -> Result<AccessRequest, WorkflowError> {
        let request = self.load_pending(request_id).await?;
        self.commit(request, RequestStatus::Error).await
    }

    async fn load_pending(&self, request_id: Uuid) -> Result<AccessRequest, WorkflowError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(StateError::NotFound)?;
        if !request.is_pending() {
            return Err(StateError::NotPending.into());
        }
        Ok(request)
    }

    async fn commit(
        &self,
        mut request: AccessRequest,
        to: RequestStatus,
    ) -> Result<AccessRequest, WorkflowError> {
        let now = self.clock.now();
        if !self.store.transition_request(request.id, to, now).await? {
            tracing::warn!(request_id = %request.id, to = %to, "lost transition race");
            return Err(StateError::NotPending.into());
        }

        crate::metrics::transition(to.as_str());
        tracing::info!(request_id = %request.id, to = %to, "request transitioned");
        request.status = to;
        request.updated_at = now;
        Ok(request)
    }
}
