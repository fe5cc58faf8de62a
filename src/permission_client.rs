//! External permission service. Staff permission administration is outside
//! this engine; every admin-only mutation consults this boolean grant and
//! honors it as a hard gate.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::PermissionConfig;
use crate::errors::ApiError;

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Whether the user may edit bookings and confirm payments.
    async fn can_manage_bookings(&self, user_id: i64) -> Result<bool, ApiError>;
}

#[derive(Clone)]
pub struct HttpPermissionClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GrantResponse {
    granted: bool,
}

impl HttpPermissionClient {
    pub fn from_config(config: &PermissionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()?,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl PermissionGate for HttpPermissionClient {
    async fn can_manage_bookings(&self, user_id: i64) -> Result<bool, ApiError> {
        let resp = self
            .http_client
            .get(format!("{}/grants/{}/bookings.manage", self.base_url, user_id))
            .send()
            .await
            .map_err(|e| ApiError::Internal(e.into()))?
            .error_for_status()
            .map_err(|e| ApiError::Internal(e.into()))?
            .json::<GrantResponse>()
            .await
            .map_err(|e| ApiError::Internal(e.into()))?;
        Ok(resp.granted)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    pub struct StaticGate(pub bool);

    #[async_trait]
    impl PermissionGate for StaticGate {
        async fn can_manage_bookings(&self, _user_id: i64) -> Result<bool, ApiError> {
            Ok(self.0)
        }
    }
}
