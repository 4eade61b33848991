use crate::adapters::services::PRIVACY_POLICY_SERVICE;
use crate::domain::ports::{Job, ServiceRegistry};
use crate::utils::error::{IntelError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const AUTO_REVOKE_JOB_ID: &str = "auto-revoke";

/// Asks the privacy policy service to revoke permissions apps have not used
/// recently. The scan itself runs inside that service.
pub struct AutoRevokeJob {
    registry: Arc<dyn ServiceRegistry>,
}

impl AutoRevokeJob {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Job for AutoRevokeJob {
    fn id(&self) -> &str {
        AUTO_REVOKE_JOB_ID
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let Some(service) = self.registry.privacy_policy() else {
            tracing::warn!("{} service not found", PRIVACY_POLICY_SERVICE);
            return Err(IntelError::ServiceUnavailable {
                name: PRIVACY_POLICY_SERVICE.to_string(),
            });
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(IntelError::Cancelled),
            result = service.revoke_unused_permissions() => {
                result?;
                tracing::info!("Auto-revoke scan complete");
                Ok(())
            }
        }
    }
}
