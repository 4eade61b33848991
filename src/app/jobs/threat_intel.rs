use crate::core::etl::EtlEngine;
use crate::core::Pipeline;
use crate::domain::model::MergeReport;
use crate::domain::ports::{Job, ServiceRegistry};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const THREAT_INTEL_JOB_ID: &str = "threat-intel-update";

/// Periodic block-list refresh. After a run that added rows the domain filter
/// is told to reload; if it is not running it picks the rows up on its next scan.
pub struct ThreatIntelJob<P: Pipeline> {
    engine: EtlEngine<P>,
    registry: Arc<dyn ServiceRegistry>,
    last_report: Mutex<Option<MergeReport>>,
}

impl<P: Pipeline> ThreatIntelJob<P> {
    pub fn new(engine: EtlEngine<P>, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            engine,
            registry,
            last_report: Mutex::new(None),
        }
    }

    pub fn last_report(&self) -> Option<MergeReport> {
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn notify_filter(&self) {
        match self.registry.domain_filter() {
            Some(filter) => {
                if let Err(e) = filter.reload_threat_intel().await {
                    tracing::warn!("Domain filter reload request failed: {}", e);
                }
            }
            None => tracing::debug!("Domain filter not running, skipping reload request"),
        }
    }
}

#[async_trait]
impl<P: Pipeline + 'static> Job for ThreatIntelJob<P> {
    fn id(&self) -> &str {
        THREAT_INTEL_JOB_ID
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let report = self.engine.run(&cancel).await?;
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report);

        if report.added > 0 {
            self.notify_filter().await;
        }
        Ok(())
    }
}
