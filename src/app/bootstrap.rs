use crate::adapters::http::HttpFetcher;
use crate::adapters::services::StaticServiceRegistry;
use crate::adapters::storage::SqliteThreatStore;
use crate::app::jobs::{AutoRevokeJob, ThreatIntelJob, AUTO_REVOKE_JOB_ID, THREAT_INTEL_JOB_ID};
use crate::app::runner::JobRunner;
use crate::app::scheduler::{AlwaysUnmetered, NetworkConstraint, PeriodicScheduler};
use crate::app::state::ScheduleStateStore;
use crate::config::TomlConfig;
use crate::core::etl::EtlEngine;
use crate::core::pipeline::ThreatIntelPipeline;
use crate::core::ConfigProvider;
use crate::domain::ports::{Job, ServiceRegistry};
use crate::utils::error::Result;
use std::sync::Arc;

pub type DefaultPipeline = ThreatIntelPipeline<HttpFetcher, SqliteThreatStore, TomlConfig>;

pub fn open_store(config: &TomlConfig) -> Result<Arc<SqliteThreatStore>> {
    Ok(Arc::new(SqliteThreatStore::open(
        config.store_path(),
        config.busy_timeout(),
    )?))
}

pub fn service_registry(config: &TomlConfig) -> Result<Arc<StaticServiceRegistry>> {
    let registry = StaticServiceRegistry::from_endpoints(
        config.services.privacy_policy_endpoint.as_deref(),
        config.services.domain_filter_endpoint.as_deref(),
        config.services_timeout(),
    )?;
    Ok(Arc::new(registry))
}

pub fn threat_intel_job(
    config: &TomlConfig,
    registry: Arc<dyn ServiceRegistry>,
    monitor: bool,
) -> Result<Arc<ThreatIntelJob<DefaultPipeline>>> {
    let store = open_store(config)?;
    let fetcher = HttpFetcher::new(&config.fetch_settings())?;
    let pipeline = ThreatIntelPipeline::new(fetcher, store, config.clone());
    let engine = EtlEngine::new_with_monitoring(pipeline, monitor);
    Ok(Arc::new(ThreatIntelJob::new(engine, registry)))
}

pub fn auto_revoke_job(registry: Arc<dyn ServiceRegistry>) -> Arc<AutoRevokeJob> {
    Arc::new(AutoRevokeJob::new(registry))
}

/// Runner for one-off invocations, honouring the configured grace period.
pub fn one_shot_runner(config: &TomlConfig, job: Arc<dyn Job>) -> JobRunner {
    JobRunner::new(job).with_grace_period(config.grace_period())
}

/// Scheduler with both periodic jobs registered.
pub fn scheduler(config: &TomlConfig, monitor: bool) -> Result<PeriodicScheduler> {
    let registry: Arc<dyn ServiceRegistry> = service_registry(config)?;

    if config.schedule.network == NetworkConstraint::Unmetered {
        tracing::warn!(
            "schedule.network = \"unmetered\" has no effect: no metering probe is available on this host"
        );
    }
    let mut scheduler =
        PeriodicScheduler::new(Arc::new(AlwaysUnmetered)).with_grace_period(config.grace_period());
    if config.schedule.persisted {
        scheduler = scheduler.with_state_store(ScheduleStateStore::load(&config.schedule.state_path)?);
    }

    scheduler.register(
        config.threat_intel_spec(THREAT_INTEL_JOB_ID),
        threat_intel_job(config, Arc::clone(&registry), monitor)?,
    );
    scheduler.register(
        config.auto_revoke_spec(AUTO_REVOKE_JOB_ID),
        auto_revoke_job(registry),
    );

    Ok(scheduler)
}
