use crate::core::Pipeline;
use crate::domain::model::MergeReport;
use crate::utils::error::{IntelError, Result};
use crate::utils::monitor::SystemMonitor;
use tokio_util::sync::CancellationToken;

/// Drives one fetch → parse → merge pass of a pipeline.
pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<MergeReport> {
        tracing::info!("Starting threat intel update");

        let batches = self.pipeline.extract(cancel).await?;
        self.monitor.log_stats("fetch");

        if cancel.is_cancelled() {
            return Err(IntelError::Cancelled);
        }

        let batch = self.pipeline.transform(batches).await?;
        tracing::info!(
            "Parsed {} unique domains ({} sources fetched, {} failed)",
            batch.entries.len(),
            batch.sources_fetched,
            batch.sources_failed
        );

        let report = self.pipeline.load(batch, cancel).await?;
        self.monitor.log_stats("merge");

        tracing::info!(
            "Threat intel update complete: {} new entries, {} already known",
            report.added,
            report.skipped()
        );
        Ok(report)
    }
}
