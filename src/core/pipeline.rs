use crate::core::parser::HostsParser;
use crate::core::{ConfigProvider, Pipeline, SourceFetcher, ThreatStore};
use crate::domain::model::{
    DomainEntry, MergeBatch, MergeReport, SourceBatch, SourceFailurePolicy,
};
use crate::utils::error::{IntelError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fetch, parse and merge configured block lists into the threat store.
pub struct ThreatIntelPipeline<F: SourceFetcher, S: ThreatStore, C: ConfigProvider> {
    fetcher: F,
    store: Arc<S>,
    config: C,
}

impl<F: SourceFetcher, S: ThreatStore, C: ConfigProvider> ThreatIntelPipeline<F, S, C> {
    pub fn new(fetcher: F, store: Arc<S>, config: C) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait::async_trait]
impl<F: SourceFetcher, S: ThreatStore, C: ConfigProvider> Pipeline for ThreatIntelPipeline<F, S, C> {
    async fn extract(&self, cancel: &CancellationToken) -> Result<Vec<SourceBatch>> {
        let policy = self.config.fetch_settings().on_source_failure;
        let sources = self.config.sources();
        let mut batches = Vec::with_capacity(sources.len());
        let mut failed = 0;

        for source in sources {
            if cancel.is_cancelled() {
                return Err(IntelError::Cancelled);
            }

            let mut parser = HostsParser::new();
            match self.fetcher.fetch(source, &mut parser, cancel).await {
                Ok(bytes) => {
                    let parsed = parser.finish();
                    tracing::info!(
                        source = %source.name,
                        bytes,
                        domains = parsed.domains.len(),
                        rejected = parsed.lines_rejected,
                        "Fetched block list"
                    );
                    batches.push(SourceBatch {
                        source: source.clone(),
                        parsed,
                        bytes,
                    });
                }
                Err(IntelError::Cancelled) => return Err(IntelError::Cancelled),
                Err(e) => match policy {
                    SourceFailurePolicy::Abort => {
                        tracing::error!("Fetching {} failed, aborting run: {}", source.name, e);
                        return Err(e);
                    }
                    SourceFailurePolicy::Continue => {
                        tracing::warn!("Fetching {} failed, continuing: {}", source.name, e);
                        failed += 1;
                    }
                },
            }
        }

        if batches.is_empty() && failed > 0 {
            return Err(IntelError::AllSourcesFailed { failed });
        }

        Ok(batches)
    }

    async fn transform(&self, batches: Vec<SourceBatch>) -> Result<MergeBatch> {
        let sources_failed = self.config.sources().len().saturating_sub(batches.len());
        let sources_fetched = batches.len();

        // Earlier sources win classification and provenance for shared domains.
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for batch in batches {
            let SourceBatch { source, parsed, .. } = batch;
            for domain in parsed.domains {
                if seen.insert(domain.clone()) {
                    entries.push(DomainEntry {
                        domain,
                        category: source.category,
                        severity: source.severity,
                        source: source.name.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            "Aggregated {} unique domains from {} sources",
            entries.len(),
            sources_fetched
        );

        Ok(MergeBatch {
            entries,
            sources_fetched,
            sources_failed,
        })
    }

    async fn load(&self, batch: MergeBatch, cancel: &CancellationToken) -> Result<MergeReport> {
        if batch.entries.is_empty() {
            tracing::info!("Nothing to merge");
            return Ok(MergeReport::default());
        }

        let store = Arc::clone(&self.store);
        let cancel = cancel.clone();
        let added_at = chrono::Utc::now().timestamp();

        let report = tokio::task::spawn_blocking(move || {
            store.merge(&batch.entries, added_at, &cancel)
        })
        .await??;

        Ok(report)
    }
}
