pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{http::HttpFetcher, storage::SqliteThreatStore};
pub use app::runner::{JobOutcome, JobRunner, JobState};
pub use app::scheduler::{JobSpec, PeriodicScheduler};
pub use config::TomlConfig;
pub use core::{etl::EtlEngine, pipeline::ThreatIntelPipeline};
pub use utils::error::{IntelError, Result};
