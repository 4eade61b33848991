pub mod auto_revoke;
pub mod threat_intel;

pub use auto_revoke::{AutoRevokeJob, AUTO_REVOKE_JOB_ID};
pub use threat_intel::{ThreatIntelJob, THREAT_INTEL_JOB_ID};
