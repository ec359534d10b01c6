//! Keycloak realm-role assignment over the admin REST API.
//!
//! Workflow per `assign`:
//! 1. Client-credentials grant against the realm token endpoint
//! 2. Look up the realm role representation by name
//! 3. POST it to the user's realm role mappings (Keycloak treats an existing
//!    mapping as a no-op, which gives the idempotency the workflow needs)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RoleGrantService;
use crate::errors::CollaboratorError;

#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    pub server_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleRepresentation {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    composite: bool,
    #[serde(rename = "clientRole", default)]
    client_role: bool,
    #[serde(rename = "containerId", default, skip_serializing_if = "Option::is_none")]
    container_id: Option<String>,
}

#[derive(Clone)]
pub struct KeycloakGrantService {
    client: reqwest::Client,
    config: KeycloakConfig,
}

impl KeycloakGrantService {
    pub fn new(config: KeycloakConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("accessgate/1.0")
            .build()?;
        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.server_url.trim_end_matches('/')
    }

    async fn admin_token(&self) -> Result<String, CollaboratorError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base(),
            self.config.realm
        );
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CollaboratorError::GrantFailed(format!("token request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::GrantFailed(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CollaboratorError::GrantFailed(format!("bad token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn realm_role(&self, bearer: &str, role: &str) -> Result<RoleRepresentation, CollaboratorError> {
        let mut url = url::Url::parse(&format!("{}/admin/realms/{}/roles/", self.base(), self.config.realm))
            .map_err(|e| CollaboratorError::GrantFailed(format!("invalid keycloak url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::GrantFailed("invalid keycloak url".into()))?
            .pop_if_empty()
            .push(role);

        let resp = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| CollaboratorError::GrantFailed(format!("role lookup failed: {}", e)))?;

        match resp.status() {
            s if s.is_success() => resp
                .json()
                .await
                .map_err(|e| CollaboratorError::GrantFailed(format!("bad role response: {}", e))),
            reqwest::StatusCode::NOT_FOUND => {
                Err(CollaboratorError::GrantFailed(format!("role not found: {}", role)))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(CollaboratorError::GrantFailed(format!(
                    "role lookup returned {}: {}",
                    s, body
                )))
            }
        }
    }
}

#[async_trait]
impl RoleGrantService for KeycloakGrantService {
    async fn assign(&self, subject_id: &str, role: &str) -> Result<(), CollaboratorError> {
        let bearer = self.admin_token().await?;
        let representation = self.realm_role(&bearer, role).await?;

        let url = format!(
            "{}/admin/realms/{}/users/{}/role-mappings/realm",
            self.base(),
            self.config.realm,
            subject_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&bearer)
            .json(&vec![representation])
            .send()
            .await
            .map_err(|e| CollaboratorError::GrantFailed(format!("role mapping failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::GrantFailed(format!(
                "role mapping returned {}: {}",
                status, body
            )));
        }

        tracing::info!(subject_id, role, "assigned realm role");
        Ok(())
    }
}
