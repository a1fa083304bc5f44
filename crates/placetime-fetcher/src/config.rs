//! Fetcher configuration from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use placetime_core::defaults;
use placetime_core::{Error, Result};
use placetime_db::PoolConfig;
use placetime_jobs::{DrainPolicy, SchedulerConfig, WorkerConfig};

/// Everything the fetcher needs, read once at startup.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `DATABASE_URL` | `postgres://localhost/placetime` | PostgreSQL connection string |
/// | `DATABASE_MAX_CONNECTIONS` | `10` | Pool size |
/// | `FETCHER_WORKERS` | `5` | Concurrent jobs |
/// | `FETCHER_QUEUE_CAPACITY` | `0` | Buffered jobs; 0 is synchronous hand-off |
/// | `FETCHER_FEED_INTERVAL_SECS` | `30` | Seconds between feed pumps |
/// | `FETCHER_IMAGE_INTERVAL_SECS` | `30` | Seconds between image pumps |
/// | `FETCHER_IMAGE_BATCH_SIZE` | `10` | Items per batch query |
/// | `FETCHER_DRAIN_POLICY` | `until_empty` | `until_empty` or `until_short` |
/// | `FETCHER_REQUEST_TIMEOUT_SECS` | `30` | Per HTTP request |
/// | `FETCHER_JOB_TIMEOUT_SECS` | `300` | Per job |
/// | `FETCHER_SHUTDOWN_GRACE_SECS` | `30` | Wait for in-flight jobs on shutdown |
/// | `FETCHER_RUN_ONCE` | `false` | One pass, then exit |
/// | `FETCHER_DEBUG_FEED` | unset | Print one feed with item ids, then exit |
/// | `IMAGE_PATH` | `/var/opt/timescroll/img` | Where cropped images are written |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub workers: usize,
    pub queue_capacity: usize,
    pub feed_interval_secs: u64,
    pub image_interval_secs: u64,
    pub image_batch_size: usize,
    pub drain_policy: DrainPolicy,
    pub request_timeout_secs: u64,
    pub job_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub run_once: bool,
    pub debug_feed: Option<String>,
    pub image_dir: PathBuf,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::DATABASE_URL.to_string(),
            database_max_connections: placetime_db::pool::DEFAULT_MAX_CONNECTIONS,
            workers: defaults::WORKER_COUNT,
            queue_capacity: defaults::QUEUE_CAPACITY,
            feed_interval_secs: defaults::FEED_INTERVAL_SECS,
            image_interval_secs: defaults::IMAGE_INTERVAL_SECS,
            image_batch_size: defaults::IMAGE_BATCH_SIZE,
            drain_policy: DrainPolicy::default(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            shutdown_grace_secs: defaults::SHUTDOWN_GRACE_SECS,
            run_once: false,
            debug_feed: None,
            image_dir: PathBuf::from(defaults::IMAGE_DIR),
        }
    }
}

impl FetcherConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// Unset or empty variables take their default. A value that does not
    /// parse, or a zero where at least one is required, is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let base = Self::default();

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(base.database_url),
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                base.database_max_connections,
            )?,
            workers: parse_or(&get, "FETCHER_WORKERS", base.workers)?,
            queue_capacity: parse_or(&get, "FETCHER_QUEUE_CAPACITY", base.queue_capacity)?,
            feed_interval_secs: parse_or(
                &get,
                "FETCHER_FEED_INTERVAL_SECS",
                base.feed_interval_secs,
            )?,
            image_interval_secs: parse_or(
                &get,
                "FETCHER_IMAGE_INTERVAL_SECS",
                base.image_interval_secs,
            )?,
            image_batch_size: parse_or(&get, "FETCHER_IMAGE_BATCH_SIZE", base.image_batch_size)?,
            drain_policy: parse_or(&get, "FETCHER_DRAIN_POLICY", base.drain_policy)?,
            request_timeout_secs: parse_or(
                &get,
                "FETCHER_REQUEST_TIMEOUT_SECS",
                base.request_timeout_secs,
            )?,
            job_timeout_secs: parse_or(&get, "FETCHER_JOB_TIMEOUT_SECS", base.job_timeout_secs)?,
            shutdown_grace_secs: parse_or(
                &get,
                "FETCHER_SHUTDOWN_GRACE_SECS",
                base.shutdown_grace_secs,
            )?,
            run_once: match get("FETCHER_RUN_ONCE") {
                Some(v) => parse_bool("FETCHER_RUN_ONCE", &v)?,
                None => base.run_once,
            },
            debug_feed: get("FETCHER_DEBUG_FEED").map(|v| v.trim().to_string()),
            image_dir: get("IMAGE_PATH").map(PathBuf::from).unwrap_or(base.image_dir),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let at_least_one = [
            ("DATABASE_MAX_CONNECTIONS", self.database_max_connections as u64),
            ("FETCHER_WORKERS", self.workers as u64),
            ("FETCHER_FEED_INTERVAL_SECS", self.feed_interval_secs),
            ("FETCHER_IMAGE_INTERVAL_SECS", self.image_interval_secs),
            ("FETCHER_IMAGE_BATCH_SIZE", self.image_batch_size as u64),
            ("FETCHER_REQUEST_TIMEOUT_SECS", self.request_timeout_secs),
            ("FETCHER_JOB_TIMEOUT_SECS", self.job_timeout_secs),
        ];
        for (key, value) in at_least_one {
            if value == 0 {
                return Err(Error::Config(format!("{} must be at least 1", key)));
            }
        }
        for (key, value) in [
            ("FETCHER_FEED_INTERVAL_SECS", self.feed_interval_secs),
            ("FETCHER_IMAGE_INTERVAL_SECS", self.image_interval_secs),
        ] {
            if value > defaults::MAX_INTERVAL_SECS {
                return Err(Error::Config(format!(
                    "{} must be at most {}",
                    key,
                    defaults::MAX_INTERVAL_SECS
                )));
            }
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_feed_interval(self.feed_interval_secs)
            .with_image_interval(self.image_interval_secs)
            .with_image_batch_size(self.image_batch_size)
            .with_drain_policy(self.drain_policy)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_workers(self.workers)
            .with_job_timeout(self.job_timeout_secs)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default().max_connections(self.database_max_connections)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid {}={:?}: expected a boolean", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<FetcherConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FetcherConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, FetcherConfig::default());
        assert_eq!(config.workers, 5);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.image_dir, PathBuf::from("/var/opt/timescroll/img"));
        assert!(!config.run_once);
        assert!(config.debug_feed.is_none());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/placetime"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("FETCHER_WORKERS", "8"),
            ("FETCHER_QUEUE_CAPACITY", "16"),
            ("FETCHER_FEED_INTERVAL_SECS", "60"),
            ("FETCHER_IMAGE_INTERVAL_SECS", "90"),
            ("FETCHER_IMAGE_BATCH_SIZE", "25"),
            ("FETCHER_DRAIN_POLICY", "until_short"),
            ("FETCHER_REQUEST_TIMEOUT_SECS", "5"),
            ("FETCHER_JOB_TIMEOUT_SECS", "120"),
            ("FETCHER_SHUTDOWN_GRACE_SECS", "0"),
            ("FETCHER_RUN_ONCE", "true"),
            ("FETCHER_DEBUG_FEED", " https://feeds.example/rss "),
            ("IMAGE_PATH", "/tmp/img"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/placetime");
        assert_eq!(config.database_max_connections, 4);
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.feed_interval_secs, 60);
        assert_eq!(config.image_interval_secs, 90);
        assert_eq!(config.image_batch_size, 25);
        assert_eq!(config.drain_policy, DrainPolicy::UntilShort);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.job_timeout_secs, 120);
        assert_eq!(config.shutdown_grace(), Duration::ZERO);
        assert!(config.run_once);
        assert_eq!(config.debug_feed.as_deref(), Some("https://feeds.example/rss"));
        assert_eq!(config.image_dir, PathBuf::from("/tmp/img"));
    }

    #[test]
    fn test_unparseable_value_is_config_error() {
        for (key, value) in [
            ("FETCHER_WORKERS", "many"),
            ("FETCHER_FEED_INTERVAL_SECS", "-1"),
            ("FETCHER_DRAIN_POLICY", "whenever"),
            ("FETCHER_RUN_ONCE", "maybe"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            assert!(matches!(err, Error::Config(ref msg) if msg.contains(key)), "{}", key);
        }
    }

    #[test]
    fn test_zero_where_one_required() {
        for key in [
            "FETCHER_WORKERS",
            "FETCHER_FEED_INTERVAL_SECS",
            "FETCHER_IMAGE_INTERVAL_SECS",
            "FETCHER_IMAGE_BATCH_SIZE",
        ] {
            assert!(matches!(load(&[(key, "0")]), Err(Error::Config(_))), "{}", key);
        }
    }

    #[test]
    fn test_interval_above_one_year_is_config_error() {
        let huge = (u64::MAX / 2).to_string();
        for key in ["FETCHER_FEED_INTERVAL_SECS", "FETCHER_IMAGE_INTERVAL_SECS"] {
            let err = load(&[(key, huge.as_str())]).unwrap_err();
            assert!(matches!(err, Error::Config(ref msg) if msg.contains(key)), "{}", key);
        }
        let year = defaults::MAX_INTERVAL_SECS.to_string();
        assert!(load(&[("FETCHER_FEED_INTERVAL_SECS", year.as_str())]).is_ok());
    }

    #[test]
    fn test_empty_value_uses_default() {
        let config = load(&[("FETCHER_WORKERS", ""), ("IMAGE_PATH", "  ")]).unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.image_dir, PathBuf::from("/var/opt/timescroll/img"));
    }

    #[test]
    fn test_derived_configs() {
        let config = FetcherConfig {
            workers: 3,
            drain_policy: DrainPolicy::UntilShort,
            ..FetcherConfig::default()
        };
        assert_eq!(config.worker_config().workers, 3);
        assert_eq!(config.worker_config().job_timeout_secs, 300);
        assert_eq!(config.scheduler_config().image_batch_size, 10);
        assert_eq!(config.scheduler_config().drain_policy, DrainPolicy::UntilShort);
        assert_eq!(config.pool_config().max_connections, 10);
    }
}
