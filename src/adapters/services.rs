use crate::domain::ports::{DomainFilterService, PrivacyPolicyService, ServiceRegistry};
use crate::utils::error::{IntelError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const PRIVACY_POLICY_SERVICE: &str = "privacy_policy";
pub const DOMAIN_FILTER_SERVICE: &str = "domain_filter";

async fn post_command(client: &Client, service: &str, endpoint: &str, command: &str) -> Result<()> {
    let url = format!("{}/{}", endpoint.trim_end_matches('/'), command);
    tracing::debug!("Calling {} at {}", service, url);

    let response = client.post(&url).send().await.map_err(|e| {
        if e.is_connect() {
            IntelError::ServiceUnavailable {
                name: service.to_string(),
            }
        } else {
            IntelError::RemoteCallError {
                service: service.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(IntelError::RemoteCallError {
            service: service.to_string(),
            message: format!("HTTP {}", status),
        });
    }
    Ok(())
}

/// Privacy policy service reached over its local HTTP control endpoint.
pub struct HttpPrivacyPolicyService {
    client: Client,
    endpoint: String,
}

impl HttpPrivacyPolicyService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PrivacyPolicyService for HttpPrivacyPolicyService {
    async fn revoke_unused_permissions(&self) -> Result<()> {
        post_command(
            &self.client,
            PRIVACY_POLICY_SERVICE,
            &self.endpoint,
            "revoke-unused-permissions",
        )
        .await
    }
}

pub struct HttpDomainFilterService {
    client: Client,
    endpoint: String,
}

impl HttpDomainFilterService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DomainFilterService for HttpDomainFilterService {
    async fn reload_threat_intel(&self) -> Result<()> {
        post_command(
            &self.client,
            DOMAIN_FILTER_SERVICE,
            &self.endpoint,
            "reload-threat-intel",
        )
        .await
    }
}

/// Registry whose handles are set explicitly, either at startup from
/// configuration or later once a collaborator comes up.
#[derive(Default)]
pub struct StaticServiceRegistry {
    privacy_policy: RwLock<Option<Arc<dyn PrivacyPolicyService>>>,
    domain_filter: RwLock<Option<Arc<dyn DomainFilterService>>>,
}

impl StaticServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP-backed handles for every configured endpoint.
    pub fn from_endpoints(
        privacy_policy: Option<&str>,
        domain_filter: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let registry = Self::new();
        if let Some(endpoint) = privacy_policy {
            registry.register_privacy_policy(Arc::new(HttpPrivacyPolicyService::new(endpoint, timeout)?));
        }
        if let Some(endpoint) = domain_filter {
            registry.register_domain_filter(Arc::new(HttpDomainFilterService::new(endpoint, timeout)?));
        }
        Ok(registry)
    }

    pub fn register_privacy_policy(&self, service: Arc<dyn PrivacyPolicyService>) {
        *self
            .privacy_policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(service);
    }

    pub fn register_domain_filter(&self, service: Arc<dyn DomainFilterService>) {
        *self
            .domain_filter
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(service);
    }
}

impl ServiceRegistry for StaticServiceRegistry {
    fn privacy_policy(&self) -> Option<Arc<dyn PrivacyPolicyService>> {
        self.privacy_policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn domain_filter(&self) -> Option<Arc<dyn DomainFilterService>> {
        self.domain_filter
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
