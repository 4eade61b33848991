use crate::core::parser::HostsParser;
use crate::domain::model::{
    BlocklistSource, DomainEntry, FetchSettings, MergeBatch, MergeReport, SourceBatch,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub trait ConfigProvider: Send + Sync {
    fn sources(&self) -> &[BlocklistSource];
    fn fetch_settings(&self) -> FetchSettings;
    fn store_path(&self) -> &str;
}

/// Retrieves one block list and streams its body into `parser`.
pub trait SourceFetcher: Send + Sync {
    /// Returns the number of body bytes consumed.
    fn fetch(
        &self,
        source: &BlocklistSource,
        parser: &mut HostsParser,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// Persistent set of threat domains. Implementations block; callers run them
/// off the async executor.
pub trait ThreatStore: Send + Sync + 'static {
    /// Inserts every absent entry in one transaction. Either the whole batch
    /// is committed or nothing is.
    fn merge(
        &self,
        entries: &[DomainEntry],
        added_at: i64,
        cancel: &CancellationToken,
    ) -> Result<MergeReport>;

    fn count(&self) -> Result<u64>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self, cancel: &CancellationToken) -> Result<Vec<SourceBatch>>;
    async fn transform(&self, batches: Vec<SourceBatch>) -> Result<MergeBatch>;
    async fn load(&self, batch: MergeBatch, cancel: &CancellationToken) -> Result<MergeReport>;
}

#[async_trait]
pub trait PrivacyPolicyService: Send + Sync {
    async fn revoke_unused_permissions(&self) -> Result<()>;
}

#[async_trait]
pub trait DomainFilterService: Send + Sync {
    /// Asks the filter to pick up the updated threat database.
    async fn reload_threat_intel(&self) -> Result<()>;
}

/// Resolves collaborator handles by name. A missing handle means the service
/// has not started yet.
pub trait ServiceRegistry: Send + Sync {
    fn privacy_policy(&self) -> Option<std::sync::Arc<dyn PrivacyPolicyService>>;
    fn domain_filter(&self) -> Option<std::sync::Arc<dyn DomainFilterService>>;
}

/// Work unit driven by the runner and scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    /// Must return promptly (usually `Err(Cancelled)`) once `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Reports whether the current uplink satisfies an unmetered-only job.
pub trait NetworkProbe: Send + Sync {
    fn is_unmetered(&self) -> bool;
}
