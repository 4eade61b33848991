use crate::app::scheduler::{JobSpec, NetworkConstraint, RetryPolicy};
use crate::core::ConfigProvider;
use crate::domain::model::{BlocklistSource, FetchSettings, SourceFailurePolicy};
use crate::utils::error::{IntelError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    pub sources: Vec<BlocklistSource>,
    pub schedule: ScheduleConfig,
    pub services: ServicesConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            fetch: FetchConfig::default(),
            sources: vec![BlocklistSource::steven_black()],
            schedule: ScheduleConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/threat-intel/threat_intel.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub max_source_bytes: usize,
    pub on_source_failure: SourceFailurePolicy,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_seconds: defaults.connect_timeout.as_secs(),
            read_timeout_seconds: defaults.read_timeout.as_secs(),
            max_source_bytes: defaults.max_source_bytes,
            on_source_failure: defaults.on_source_failure,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub threat_intel_period_hours: u64,
    pub auto_revoke_period_hours: u64,
    pub network: NetworkConstraint,
    pub persisted: bool,
    pub state_path: String,
    pub retry_initial_seconds: u64,
    pub retry_max_seconds: u64,
    pub grace_period_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            threat_intel_period_hours: 24,
            auto_revoke_period_hours: 7 * 24,
            network: NetworkConstraint::Unmetered,
            persisted: true,
            state_path: "/var/lib/threat-intel/schedule.json".to_string(),
            retry_initial_seconds: 30,
            retry_max_seconds: 3600,
            grace_period_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub privacy_policy_endpoint: Option<String>,
    pub domain_filter_endpoint: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            privacy_policy_endpoint: None,
            domain_filter_endpoint: None,
            timeout_seconds: 10,
        }
    }
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(IntelError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| IntelError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replace `${VAR}` with the environment value; unknown variables are left as-is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| IntelError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn services_timeout(&self) -> Duration {
        Duration::from_secs(self.services.timeout_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.schedule.grace_period_seconds)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(self.schedule.retry_initial_seconds),
            max: Duration::from_secs(self.schedule.retry_max_seconds),
        }
    }

    pub fn threat_intel_spec(&self, id: &str) -> JobSpec {
        JobSpec::new(id, hours(self.schedule.threat_intel_period_hours))
            .with_network(self.schedule.network)
            .with_retry(self.retry_policy())
            .persisted(self.schedule.persisted)
    }

    /// The revoke call is local, so it is not bound to the network constraint.
    pub fn auto_revoke_spec(&self, id: &str) -> JobSpec {
        JobSpec::new(id, hours(self.schedule.auto_revoke_period_hours))
            .with_retry(self.retry_policy())
            .persisted(self.schedule.persisted)
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(60 * 60))
}

impl ConfigProvider for TomlConfig {
    fn sources(&self) -> &[BlocklistSource] {
        &self.sources
    }

    fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            connect_timeout: Duration::from_secs(self.fetch.connect_timeout_seconds),
            read_timeout: Duration::from_secs(self.fetch.read_timeout_seconds),
            max_source_bytes: self.fetch.max_source_bytes,
            on_source_failure: self.fetch.on_source_failure,
            user_agent: self.fetch.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }

    fn store_path(&self) -> &str {
        &self.store.path
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_path("store.path", &self.store.path)?;

        if self.sources.is_empty() {
            return Err(IntelError::MissingConfigError {
                field: "sources".to_string(),
            });
        }
        for source in &self.sources {
            validation::validate_non_empty_string("sources.name", &source.name)?;
            validation::validate_url("sources.url", &source.url)?;
            validation::validate_range("sources.severity", source.severity, 0, 10)?;
        }
        validation::validate_unique_names(
            "sources.name",
            self.sources.iter().map(|s| s.name.as_str()),
        )?;

        validation::validate_positive_number(
            "fetch.connect_timeout_seconds",
            self.fetch.connect_timeout_seconds,
            1,
        )?;
        validation::validate_positive_number(
            "fetch.read_timeout_seconds",
            self.fetch.read_timeout_seconds,
            1,
        )?;
        validation::validate_positive_number(
            "fetch.max_source_bytes",
            self.fetch.max_source_bytes as u64,
            1024,
        )?;

        validation::validate_positive_number(
            "schedule.threat_intel_period_hours",
            self.schedule.threat_intel_period_hours,
            1,
        )?;
        validation::validate_positive_number(
            "schedule.auto_revoke_period_hours",
            self.schedule.auto_revoke_period_hours,
            1,
        )?;
        validation::validate_positive_number(
            "schedule.retry_initial_seconds",
            self.schedule.retry_initial_seconds,
            1,
        )?;
        if self.schedule.retry_max_seconds < self.schedule.retry_initial_seconds {
            return Err(IntelError::InvalidConfigValueError {
                field: "schedule.retry_max_seconds".to_string(),
                value: self.schedule.retry_max_seconds.to_string(),
                reason: "Must not be below schedule.retry_initial_seconds".to_string(),
            });
        }
        if self.schedule.persisted {
            validation::validate_path("schedule.state_path", &self.schedule.state_path)?;
        }

        if let Some(endpoint) = &self.services.privacy_policy_endpoint {
            validation::validate_url("services.privacy_policy_endpoint", endpoint)?;
        }
        if let Some(endpoint) = &self.services.domain_filter_endpoint {
            validation::validate_url("services.domain_filter_endpoint", endpoint)?;
        }

        Ok(())
    }
}
