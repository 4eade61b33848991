use clap::Parser;
use threat_intel_updater::app::bootstrap;
use threat_intel_updater::app::jobs::THREAT_INTEL_JOB_ID;
use threat_intel_updater::core::{ConfigProvider, ThreatStore};
use threat_intel_updater::utils::{logger, validation::Validate};
use threat_intel_updater::{CliConfig, Command, IntelError, JobOutcome, JobRunner, TomlConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting threat-intel");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = match cli.load_settings().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => fail(&e, 1),
    };

    if cli.monitor {
        tracing::info!("System monitoring enabled");
    }

    let code = match cli.command {
        Command::RunNow => run_now(&config, cli.monitor).await,
        Command::RevokeNow => revoke_now(&config).await,
        Command::Daemon => daemon(&config, cli.monitor).await,
        Command::Stats => stats(&config),
        Command::CheckConfig => {
            check_config(&config);
            Ok(0)
        }
    };

    match code {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => fail(&e, 1),
    }
}

fn fail(e: &IntelError, code: i32) -> ! {
    tracing::error!("{}", e);
    tracing::error!("Suggestion: {}", e.recovery_suggestion());
    eprintln!("Error: {}", e);
    eprintln!("Suggestion: {}", e.recovery_suggestion());
    std::process::exit(code)
}

fn exit_code(outcome: JobOutcome) -> i32 {
    match outcome {
        JobOutcome::Completed => 0,
        JobOutcome::Failed => 2,
        JobOutcome::Cancelled => 3,
    }
}

/// Runs one job to its end; Ctrl-C cancels it.
async fn run_interruptible(runner: &JobRunner) -> threat_intel_updater::Result<JobOutcome> {
    let cancel = CancellationToken::new();
    let handle = runner.submit_with_token(cancel.clone())?;

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling job");
            cancel.cancel();
        }
    });

    let outcome = handle.outcome().await;
    watcher.abort();
    Ok(outcome)
}

async fn run_now(config: &TomlConfig, monitor: bool) -> threat_intel_updater::Result<i32> {
    let registry = bootstrap::service_registry(config)?;
    let job = bootstrap::threat_intel_job(config, registry, monitor)?;
    let runner = bootstrap::one_shot_runner(config, job.clone());

    let outcome = run_interruptible(&runner).await?;
    match (outcome, job.last_report()) {
        (JobOutcome::Completed, Some(report)) => {
            println!(
                "Threat intel updated: {} offered, {} added, {} already known",
                report.offered,
                report.added,
                report.skipped()
            );
        }
        (outcome, _) => println!("Threat intel update ended: {:?}", outcome),
    }
    Ok(exit_code(outcome))
}

async fn revoke_now(config: &TomlConfig) -> threat_intel_updater::Result<i32> {
    let registry = bootstrap::service_registry(config)?;
    let runner = bootstrap::one_shot_runner(config, bootstrap::auto_revoke_job(registry));

    let outcome = run_interruptible(&runner).await?;
    println!("Auto revoke ended: {:?}", outcome);
    Ok(exit_code(outcome))
}

async fn daemon(config: &TomlConfig, monitor: bool) -> threat_intel_updater::Result<i32> {
    let scheduler = bootstrap::scheduler(config, monitor)?;
    let shutdown = CancellationToken::new();
    let handle = scheduler.start(shutdown.clone());

    tracing::info!("Daemon running, waiting for shutdown signal");
    wait_for_shutdown().await;

    tracing::info!("Shutting down scheduler");
    shutdown.cancel();
    handle.await?;
    Ok(0)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for Ctrl-C: {}", e);
    }
}

fn stats(config: &TomlConfig) -> threat_intel_updater::Result<i32> {
    let store = bootstrap::open_store(config)?;
    println!("Store: {}", config.store_path());
    println!("Domains: {}", store.count()?);
    for (source, count) in store.count_by_source()? {
        println!("  {:<32} {}", source, count);
    }
    Ok(0)
}

fn check_config(config: &TomlConfig) {
    let settings = config.fetch_settings();
    println!("Configuration OK");
    println!("Store: {}", config.store_path());
    println!(
        "Fetch: connect {:?}, read {:?}, limit {} bytes, on failure {:?}",
        settings.connect_timeout,
        settings.read_timeout,
        settings.max_source_bytes,
        settings.on_source_failure
    );
    println!("Sources:");
    for source in config.sources() {
        println!(
            "  {} [{} / severity {}] {}",
            source.name, source.category, source.severity, source.url
        );
    }
    let spec = config.threat_intel_spec(THREAT_INTEL_JOB_ID);
    println!(
        "Schedule: every {:?}, network {:?}, persisted {}",
        spec.period, spec.network, spec.persisted
    );
    let services: Vec<&str> = [
        config.services.privacy_policy_endpoint.as_deref(),
        config.services.domain_filter_endpoint.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    println!("Services: {}", if services.is_empty() { "none".to_string() } else { services.join(", ") });
}

