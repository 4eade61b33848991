use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::error::IntelError;

/// Classification tag stored with every threat domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Tracker,
    Malware,
    Phishing,
    Ads,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tracker => "TRACKER",
            Category::Malware => "MALWARE",
            Category::Phishing => "PHISHING",
            Category::Ads => "ADS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACKER" => Ok(Category::Tracker),
            "MALWARE" => Ok(Category::Malware),
            "PHISHING" => Ok(Category::Phishing),
            "ADS" => Ok(Category::Ads),
            other => Err(IntelError::InvalidConfigValueError {
                field: "category".to_string(),
                value: other.to_string(),
                reason: "Expected one of TRACKER, MALWARE, PHISHING, ADS".to_string(),
            }),
        }
    }
}

/// A persisted row of the `threat_domains` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatDomain {
    pub domain: String,
    pub category: Category,
    pub severity: i64,
    pub added_at: i64,
    pub source: String,
}

/// One configured block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistSource {
    /// Provenance identifier written to `threat_domains.source`.
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: Category,
    #[serde(default = "default_severity")]
    pub severity: i64,
}

fn default_category() -> Category {
    Category::Tracker
}

fn default_severity() -> i64 {
    1
}

impl BlocklistSource {
    pub fn steven_black() -> Self {
        Self {
            name: "StevenBlack/hosts".to_string(),
            url: "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts".to_string(),
            category: Category::Tracker,
            severity: 1,
        }
    }
}

/// What to do when one source cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFailurePolicy {
    /// The first failing source fails the whole run.
    #[default]
    Abort,
    /// Merge whatever was fetched; fail only when every source failed.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_source_bytes: usize,
    pub on_source_failure: SourceFailurePolicy,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            max_source_bytes: 20 * 1024 * 1024,
            on_source_failure: SourceFailurePolicy::Abort,
            user_agent: format!("threat-intel-updater/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Output of streaming one source through the hosts parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedList {
    pub domains: Vec<String>,
    pub lines_seen: usize,
    pub lines_rejected: usize,
}

/// Domains parsed from one source, tagged with where they came from.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: BlocklistSource,
    pub parsed: ParsedList,
    pub bytes: u64,
}

/// A row to insert if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntry {
    pub domain: String,
    pub category: Category,
    pub severity: i64,
    pub source: String,
}

/// Everything one run will commit in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct MergeBatch {
    pub entries: Vec<DomainEntry>,
    pub sources_fetched: usize,
    pub sources_failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Rows in the batch that were offered to the store.
    pub offered: usize,
    /// Rows that did not exist before and were inserted.
    pub added: usize,
}

impl MergeReport {
    pub fn skipped(&self) -> usize {
        self.offered - self.added
    }
}
