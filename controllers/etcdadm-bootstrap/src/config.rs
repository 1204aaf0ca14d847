//! Process configuration.
//!
//! Read once from environment variables at startup and threaded through the
//! controller; nothing reads the environment after that.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CONCURRENCY: u16 = 4;
const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PERSIST_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_MISSING_REFERENCE_RESYNC_SECS: u64 = 300;

/// Runtime settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Only watch this namespace; all namespaces when `None`
    pub namespace: Option<String>,
    pub metrics_addr: SocketAddr,
    /// Maximum number of configs reconciled at the same time
    pub concurrency: u16,
    /// Deadline for a single reconciliation pass
    pub reconcile_timeout: Duration,
    /// Attempts at writing the data secret before giving up with `PersistFailed`
    pub persist_max_attempts: u32,
    /// Timed requeue for configs waiting on a missing secret
    pub missing_reference_resync: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            concurrency: DEFAULT_CONCURRENCY,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            persist_max_attempts: DEFAULT_PERSIST_MAX_ATTEMPTS,
            missing_reference_resync: Duration::from_secs(DEFAULT_MISSING_REFERENCE_RESYNC_SECS),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());
        let metrics_addr = lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());

        let config = Self {
            namespace,
            metrics_addr: parse("METRICS_ADDR", &metrics_addr)?,
            concurrency: parse_or("RECONCILE_CONCURRENCY", &lookup, DEFAULT_CONCURRENCY)?,
            reconcile_timeout: Duration::from_secs(parse_or(
                "RECONCILE_TIMEOUT_SECS",
                &lookup,
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            )?),
            persist_max_attempts: parse_or("PERSIST_MAX_ATTEMPTS", &lookup, DEFAULT_PERSIST_MAX_ATTEMPTS)?,
            missing_reference_resync: Duration::from_secs(parse_or(
                "MISSING_REFERENCE_RESYNC_SECS",
                &lookup,
                DEFAULT_MISSING_REFERENCE_RESYNC_SECS,
            )?),
        };

        if config.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if config.persist_max_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "PERSIST_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if config.reconcile_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}

fn parse_or<T: FromStr>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}
