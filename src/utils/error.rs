use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntelError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Source {source_name} returned HTTP {status}")]
    HttpStatusError { source_name: String, status: u16 },

    #[error("Source {source_name} exceeded the size limit of {limit} bytes")]
    PayloadTooLarge { source_name: String, limit: usize },

    #[error("Storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Service {name} is not available")]
    ServiceUnavailable { name: String },

    #[error("Call to {service} failed: {message}")]
    RemoteCallError { service: String, message: String },

    #[error("No source could be fetched ({failed} failed)")]
    AllSourcesFailed { failed: usize },

    #[error("Job {job} is already running")]
    JobBusy { job: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl IntelError {
    /// Errors that a later run can reasonably be expected to get past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IntelError::HttpError(_)
                | IntelError::HttpStatusError { .. }
                | IntelError::StorageError(_)
                | IntelError::IoError(_)
                | IntelError::ServiceUnavailable { .. }
                | IntelError::RemoteCallError { .. }
                | IntelError::AllSourcesFailed { .. }
                | IntelError::JobBusy { .. }
                | IntelError::Cancelled
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            IntelError::HttpError(_)
            | IntelError::HttpStatusError { .. }
            | IntelError::AllSourcesFailed { .. } => {
                "Check network connectivity and that the source URLs are reachable"
            }
            IntelError::PayloadTooLarge { .. } => {
                "Raise fetch.max_source_bytes or point the source at a smaller list"
            }
            IntelError::StorageError(_) => {
                "Check that the database path is writable and not locked by another writer"
            }
            IntelError::IoError(_) => "Check file permissions and available disk space",
            IntelError::SerializationError(_) => "Delete the corrupted scheduler state file",
            IntelError::ConfigError { .. }
            | IntelError::InvalidConfigValueError { .. }
            | IntelError::MissingConfigError { .. } => "Fix the configuration file and retry",
            IntelError::ServiceUnavailable { .. } | IntelError::RemoteCallError { .. } => {
                "The collaborating service may still be starting; the job will retry"
            }
            IntelError::JobBusy { .. } => "Wait for the running job to finish",
            IntelError::TaskError(_) | IntelError::Cancelled => "Run the job again",
        }
    }
}

pub type Result<T> = std::result::Result<T, IntelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(IntelError::ServiceUnavailable {
            name: "privacy".to_string()
        }
        .is_transient());
        assert!(IntelError::Cancelled.is_transient());
        assert!(!IntelError::ConfigError {
            message: "bad".to_string()
        }
        .is_transient());
        assert!(!IntelError::MissingConfigError {
            field: "sources".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_status_error_message() {
        let err = IntelError::HttpStatusError {
            source_name: "StevenBlack/hosts".to_string(),
            status: 503,
        };
        assert_eq!(err.to_string(), "Source StevenBlack/hosts returned HTTP 503");
    }
}
