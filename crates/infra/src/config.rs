//! Run configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use ebssnap_core::{CorrelationId, ExpiryBounds};

use crate::jobs::dispatcher::DEFAULT_ENQUEUE_TIMEOUT;
use crate::jobs::retry::DEFAULT_MAX_ATTEMPTS;
use crate::remote::DEFAULT_PAGE_SIZE;

pub const DEFAULT_DESCRIPTION: &str = "EBSSnapshot script";
pub const DEFAULT_WORKERS: usize = 4;

pub const ENV_REGION: &str = "EBSSNAP_REGION";
pub const ENV_FALLBACK_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_DESCRIPTION: &str = "EBSSNAP_DESCRIPTION";
pub const ENV_WORKERS: &str = "EBSSNAP_WORKERS";
pub const ENV_RUN_ID: &str = "EBSSNAP_RUN_ID";
pub const ENV_PAGE_SIZE: &str = "EBSSNAP_PAGE_SIZE";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "EBSSNAP_RETRY_MAX_ATTEMPTS";
pub const ENV_ENQUEUE_TIMEOUT_SECS: &str = "EBSSNAP_ENQUEUE_TIMEOUT_SECS";
pub const ENV_EXPIRE_GT_DAYS: &str = "EBSSNAP_EXPIRE_GT_DAYS";
pub const ENV_EXPIRE_LT_DAYS: &str = "EBSSNAP_EXPIRE_LT_DAYS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Settings for one create or expire run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub region: String,
    pub description: String,
    pub workers: usize,
    pub correlation_id: CorrelationId,
    pub page_size: usize,
    pub retry_max_attempts: u32,
    pub enqueue_timeout: Duration,
}

impl RunConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            description: DEFAULT_DESCRIPTION.to_string(),
            workers: DEFAULT_WORKERS,
            correlation_id: CorrelationId::new(),
            page_size: DEFAULT_PAGE_SIZE,
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let region = get(ENV_REGION)
            .or_else(|| get(ENV_FALLBACK_REGION))
            .ok_or(ConfigError::Missing(ENV_REGION))?;

        let mut config = Self::new(region.trim());
        if let Some(description) = get(ENV_DESCRIPTION) {
            config.description = description;
        }
        if let Some(raw) = get(ENV_WORKERS) {
            config.workers = parse_positive(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = get(ENV_RUN_ID) {
            config.correlation_id = parse(ENV_RUN_ID, &raw)?;
        }
        if let Some(raw) = get(ENV_PAGE_SIZE) {
            config.page_size = parse_positive(ENV_PAGE_SIZE, &raw)?;
        }
        if let Some(raw) = get(ENV_RETRY_MAX_ATTEMPTS) {
            config.retry_max_attempts = parse_positive(ENV_RETRY_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = get(ENV_ENQUEUE_TIMEOUT_SECS) {
            config.enqueue_timeout =
                Duration::from_secs(parse_positive(ENV_ENQUEUE_TIMEOUT_SECS, &raw)?);
        }
        Ok(config)
    }
}

/// Expiry bounds from `EBSSNAP_EXPIRE_GT_DAYS` / `EBSSNAP_EXPIRE_LT_DAYS`.
pub fn expiry_bounds_from_lookup<F>(lookup: F) -> Result<ExpiryBounds, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &'static str| -> Result<Option<i64>, ConfigError> {
        match lookup(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse(key, &raw).map(Some),
            None => Ok(None),
        }
    };
    Ok(ExpiryBounds::new(get(ENV_EXPIRE_GT_DAYS)?, get(ENV_EXPIRE_LT_DAYS)?))
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value: T = parse(key, raw)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = RunConfig::from_lookup(lookup(&[(ENV_REGION, "eu-west-1")])).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.description, "EBSSnapshot script");
        assert_eq!(config.workers, 4);
        assert_eq!(config.page_size, 10_000);
        assert_eq!(config.retry_max_attempts, 10);
        assert_eq!(config.enqueue_timeout, Duration::from_secs(60));
    }

    #[test]
    fn region_falls_back_to_aws_default() {
        let config =
            RunConfig::from_lookup(lookup(&[(ENV_FALLBACK_REGION, "ap-south-1")])).unwrap();
        assert_eq!(config.region, "ap-south-1");

        let err = RunConfig::from_lookup(lookup(&[(ENV_REGION, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_REGION));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn overrides_are_parsed() {
        let run_id = "01890a5d-ac96-774b-bcce-b302099a8057";
        let config = RunConfig::from_lookup(lookup(&[
            (ENV_REGION, "us-west-2"),
            (ENV_DESCRIPTION, "weekly"),
            (ENV_WORKERS, "16"),
            (ENV_RUN_ID, run_id),
            (ENV_PAGE_SIZE, "500"),
            (ENV_RETRY_MAX_ATTEMPTS, "3"),
            (ENV_ENQUEUE_TIMEOUT_SECS, "5"),
        ]))
        .unwrap();
        assert_eq!(config.description, "weekly");
        assert_eq!(config.workers, 16);
        assert_eq!(config.correlation_id.to_string(), run_id);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.enqueue_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_worker_counts() {
        let err =
            RunConfig::from_lookup(lookup(&[(ENV_REGION, "r"), (ENV_WORKERS, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_WORKERS, .. }));

        let err =
            RunConfig::from_lookup(lookup(&[(ENV_REGION, "r"), (ENV_WORKERS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_WORKERS, .. }));
    }

    #[test]
    fn rejects_bad_run_id() {
        let err =
            RunConfig::from_lookup(lookup(&[(ENV_REGION, "r"), (ENV_RUN_ID, "nope")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_RUN_ID, .. }));
    }

    #[test]
    fn expiry_bounds_are_optional() {
        let bounds = expiry_bounds_from_lookup(lookup(&[])).unwrap();
        assert_eq!(bounds, ExpiryBounds::unbounded());

        let bounds = expiry_bounds_from_lookup(lookup(&[(ENV_EXPIRE_GT_DAYS, "-7")])).unwrap();
        assert_eq!(bounds, ExpiryBounds::gt(-7));

        let err = expiry_bounds_from_lookup(lookup(&[(ENV_EXPIRE_LT_DAYS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_EXPIRE_LT_DAYS, .. }));
    }
}
