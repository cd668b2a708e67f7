mod duration;

use std::time::Duration;

pub use duration::parse_duration;

pub const DEFAULT_TIMEOUT: &str = "10s";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cluster or thanos query url cannot be empty")]
    MissingRequired,

    #[error("invalid timeout {input:?}\n{report}")]
    InvalidTimeout { input: String, report: String },
}

/// Everything a single run needs, validated before any query is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cluster: String,
    pub thanos: String,
    /// Deadline shared by all queries of the run.
    pub timeout: Duration,
}

impl Config {
    pub fn new(
        cluster: impl Into<String>,
        thanos: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let cluster = cluster.into();
        let thanos = thanos.into();
        if cluster.is_empty() || thanos.is_empty() {
            return Err(ConfigError::MissingRequired);
        }
        Ok(Config {
            cluster,
            thanos,
            timeout,
        })
    }
}
