//! Runtime configuration from environment variables and an optional TOML file.
//!
//! Values are layered: built-in defaults, then the TOML file (if any), then
//! `EXEC_CORE_*` environment variables. Invalid values fall back to the
//! layer below without failing; out-of-range values are clamped.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `EXEC_CORE_MIN_CONCURRENT` | 1 | Lower bound of the task concurrency limit |
//! | `EXEC_CORE_MAX_CONCURRENT` | 2 × CPUs | Upper bound of the task concurrency limit |
//! | `EXEC_CORE_INITIAL_CONCURRENT` | max | Starting task concurrency limit |
//! | `EXEC_CORE_SCALE_INTERVAL_MS` | 5000 | Scaling loop period |
//! | `EXEC_CORE_SAMPLE_WINDOW_MS` | 60000 | Resource sample window |
//! | `EXEC_CORE_RETRY_BASE_MS` | 1000 | Base of task retry backoff |
//! | `EXEC_CORE_CACHE_MAX_SIZE` | 52428800 | Cache size bound (bytes) |
//! | `EXEC_CORE_CACHE_MAX_ENTRIES` | 1000 | Cache entry bound |
//! | `EXEC_CORE_CACHE_DEFAULT_TTL_SECS` | 0 | Default TTL (0 = none) |
//! | `EXEC_CORE_CACHE_CLEANUP_SECS` | 60 | Periodic cleanup interval |
//! | `EXEC_CORE_MAX_CONCURRENT_REQUESTS` | 6 | Pipeline requests in flight |
//! | `EXEC_CORE_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::pipeline::DEFAULT_MAX_CONCURRENT_REQUESTS;
use crate::scheduler::SchedulerConfig;

const MIN_SCALE_INTERVAL_MS: u64 = 100;
const MIN_CACHE_SIZE: usize = 1024;
const MAX_CONCURRENCY: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for every component of the execution core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub max_concurrent_requests: usize,
    pub shutdown_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Flat, serializable summary of the effective values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub min_concurrent: usize,
    pub max_concurrent: usize,
    pub initial_concurrent: usize,
    pub scale_interval_ms: u64,
    pub sample_window_ms: u64,
    pub retry_base_ms: u64,
    pub cache_max_size: usize,
    pub cache_max_entries: usize,
    pub cache_default_ttl_secs: u64,
    pub cache_cleanup_secs: u64,
    pub max_concurrent_requests: usize,
    pub shutdown_timeout_secs: u64,
}

impl EffectiveConfig {
    /// `(ENV_VAR, value)` pairs in table order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("EXEC_CORE_MIN_CONCURRENT", self.min_concurrent.to_string()),
            ("EXEC_CORE_MAX_CONCURRENT", self.max_concurrent.to_string()),
            ("EXEC_CORE_INITIAL_CONCURRENT", self.initial_concurrent.to_string()),
            ("EXEC_CORE_SCALE_INTERVAL_MS", self.scale_interval_ms.to_string()),
            ("EXEC_CORE_SAMPLE_WINDOW_MS", self.sample_window_ms.to_string()),
            ("EXEC_CORE_RETRY_BASE_MS", self.retry_base_ms.to_string()),
            ("EXEC_CORE_CACHE_MAX_SIZE", self.cache_max_size.to_string()),
            ("EXEC_CORE_CACHE_MAX_ENTRIES", self.cache_max_entries.to_string()),
            ("EXEC_CORE_CACHE_DEFAULT_TTL_SECS", self.cache_default_ttl_secs.to_string()),
            ("EXEC_CORE_CACHE_CLEANUP_SECS", self.cache_cleanup_secs.to_string()),
            ("EXEC_CORE_MAX_CONCURRENT_REQUESTS", self.max_concurrent_requests.to_string()),
            ("EXEC_CORE_SHUTDOWN_TIMEOUT", self.shutdown_timeout_secs.to_string()),
        ]
    }
}

/// On-disk layout. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    scheduler: SchedulerSection,
    cache: CacheSection,
    pipeline: PipelineSection,
    lifecycle: LifecycleSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchedulerSection {
    min_concurrent: Option<usize>,
    max_concurrent: Option<usize>,
    initial_concurrent: Option<usize>,
    scale_interval_ms: Option<u64>,
    sample_window_ms: Option<u64>,
    retry_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    max_size: Option<usize>,
    max_entries: Option<usize>,
    default_ttl_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PipelineSection {
    max_concurrent_requests: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LifecycleSection {
    shutdown_timeout_secs: Option<u64>,
}

/// Parse a `usize` env var, returning `current` on missing or invalid.
fn parse_usize(key: &str, current: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(current),
        Err(_) => current,
    }
}

/// Parse a `u64` env var, returning `current` on missing or invalid.
fn parse_u64(key: &str, current: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(current),
        Err(_) => current,
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Raw values before clamping, in the units the knobs are expressed in.
struct Knobs {
    min_concurrent: usize,
    max_concurrent: usize,
    initial_concurrent: Option<usize>,
    scale_interval_ms: u64,
    sample_window_ms: u64,
    retry_base_ms: u64,
    cache_max_size: usize,
    cache_max_entries: usize,
    cache_default_ttl_secs: u64,
    cache_cleanup_secs: u64,
    max_concurrent_requests: usize,
    shutdown_timeout_secs: u64,
}

impl Knobs {
    fn defaults() -> Self {
        let core = CoreConfig::default();
        Self {
            min_concurrent: core.scheduler.min_concurrent,
            max_concurrent: core.scheduler.max_concurrent,
            initial_concurrent: None,
            scale_interval_ms: millis(core.scheduler.scale_interval),
            sample_window_ms: millis(core.scheduler.sample_window),
            retry_base_ms: millis(core.scheduler.retry_base),
            cache_max_size: core.cache.max_size,
            cache_max_entries: core.cache.max_entries,
            cache_default_ttl_secs: 0,
            cache_cleanup_secs: core.cache.cleanup_interval.as_secs(),
            max_concurrent_requests: core.max_concurrent_requests,
            shutdown_timeout_secs: core.shutdown_timeout.as_secs(),
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        let s = file.scheduler;
        self.min_concurrent = s.min_concurrent.unwrap_or(self.min_concurrent);
        self.max_concurrent = s.max_concurrent.unwrap_or(self.max_concurrent);
        self.initial_concurrent = s.initial_concurrent.or(self.initial_concurrent);
        self.scale_interval_ms = s.scale_interval_ms.unwrap_or(self.scale_interval_ms);
        self.sample_window_ms = s.sample_window_ms.unwrap_or(self.sample_window_ms);
        self.retry_base_ms = s.retry_base_ms.unwrap_or(self.retry_base_ms);

        let c = file.cache;
        self.cache_max_size = c.max_size.unwrap_or(self.cache_max_size);
        self.cache_max_entries = c.max_entries.unwrap_or(self.cache_max_entries);
        self.cache_default_ttl_secs = c.default_ttl_secs.unwrap_or(self.cache_default_ttl_secs);
        self.cache_cleanup_secs = c.cleanup_interval_secs.unwrap_or(self.cache_cleanup_secs);

        self.max_concurrent_requests = file
            .pipeline
            .max_concurrent_requests
            .unwrap_or(self.max_concurrent_requests);
        self.shutdown_timeout_secs = file
            .lifecycle
            .shutdown_timeout_secs
            .unwrap_or(self.shutdown_timeout_secs);
    }

    fn apply_env(&mut self) {
        self.min_concurrent = parse_usize("EXEC_CORE_MIN_CONCURRENT", self.min_concurrent);
        self.max_concurrent = parse_usize("EXEC_CORE_MAX_CONCURRENT", self.max_concurrent);
        if let Ok(val) = std::env::var("EXEC_CORE_INITIAL_CONCURRENT") {
            if let Ok(n) = val.trim().parse::<usize>() {
                self.initial_concurrent = Some(n);
            }
        }
        self.scale_interval_ms = parse_u64("EXEC_CORE_SCALE_INTERVAL_MS", self.scale_interval_ms);
        self.sample_window_ms = parse_u64("EXEC_CORE_SAMPLE_WINDOW_MS", self.sample_window_ms);
        self.retry_base_ms = parse_u64("EXEC_CORE_RETRY_BASE_MS", self.retry_base_ms);
        self.cache_max_size = parse_usize("EXEC_CORE_CACHE_MAX_SIZE", self.cache_max_size);
        self.cache_max_entries = parse_usize("EXEC_CORE_CACHE_MAX_ENTRIES", self.cache_max_entries);
        self.cache_default_ttl_secs =
            parse_u64("EXEC_CORE_CACHE_DEFAULT_TTL_SECS", self.cache_default_ttl_secs);
        self.cache_cleanup_secs = parse_u64("EXEC_CORE_CACHE_CLEANUP_SECS", self.cache_cleanup_secs);
        self.max_concurrent_requests =
            parse_usize("EXEC_CORE_MAX_CONCURRENT_REQUESTS", self.max_concurrent_requests);
        self.shutdown_timeout_secs = parse_u64("EXEC_CORE_SHUTDOWN_TIMEOUT", self.shutdown_timeout_secs);
    }

    fn build(self) -> CoreConfig {
        let min_concurrent = self.min_concurrent.clamp(1, MAX_CONCURRENCY);
        let max_concurrent = self.max_concurrent.clamp(min_concurrent, MAX_CONCURRENCY);
        let initial_concurrent = self
            .initial_concurrent
            .unwrap_or(max_concurrent)
            .clamp(min_concurrent, max_concurrent);

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            min_concurrent,
            max_concurrent,
            initial_concurrent,
            scale_interval: Duration::from_millis(self.scale_interval_ms.max(MIN_SCALE_INTERVAL_MS)),
            sample_window: Duration::from_millis(self.sample_window_ms.max(1)),
            retry_base: Duration::from_millis(self.retry_base_ms),
            ..defaults
        };

        let cache = CacheConfig {
            max_size: self.cache_max_size.max(MIN_CACHE_SIZE),
            max_entries: self.cache_max_entries.max(1),
            default_ttl: (self.cache_default_ttl_secs > 0)
                .then(|| Duration::from_secs(self.cache_default_ttl_secs)),
            cleanup_interval: Duration::from_secs(self.cache_cleanup_secs.max(1)),
        };

        CoreConfig {
            scheduler,
            cache,
            max_concurrent_requests: self.max_concurrent_requests.clamp(1, MAX_CONCURRENCY),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs.max(1)),
        }
    }
}

/// Load configuration from environment variables over the defaults.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> CoreConfig {
    let mut knobs = Knobs::defaults();
    knobs.apply_env();
    knobs.build()
}

/// Load `path` as TOML, then apply environment overrides.
pub fn load_file(path: impl AsRef<Path>) -> Result<CoreConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FileConfig = toml::from_str(&text)?;

    let mut knobs = Knobs::defaults();
    knobs.apply_file(file);
    knobs.apply_env();
    Ok(knobs.build())
}

impl CoreConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            min_concurrent: self.scheduler.min_concurrent,
            max_concurrent: self.scheduler.max_concurrent,
            initial_concurrent: self.scheduler.initial_concurrent,
            scale_interval_ms: millis(self.scheduler.scale_interval),
            sample_window_ms: millis(self.scheduler.sample_window),
            retry_base_ms: millis(self.scheduler.retry_base),
            cache_max_size: self.cache.max_size,
            cache_max_entries: self.cache.max_entries,
            cache_default_ttl_secs: self.cache.default_ttl.map_or(0, |d| d.as_secs()),
            cache_cleanup_secs: self.cache.cleanup_interval.as_secs(),
            max_concurrent_requests: self.max_concurrent_requests,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
        }
    }

    /// Settings that load fine but are probably mistakes.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.scheduler.retry_base.is_zero() {
            warnings.push("EXEC_CORE_RETRY_BASE_MS is 0; failed tasks retry immediately".to_string());
        }
        if self.scheduler.sample_window < self.scheduler.scale_interval {
            warnings.push(
                "EXEC_CORE_SAMPLE_WINDOW_MS is shorter than the scaling interval; samples are skipped"
                    .to_string(),
            );
        }
        if self.scheduler.min_concurrent == self.scheduler.max_concurrent {
            warnings.push("Task concurrency is pinned; adaptive scaling has no effect".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "EXEC_CORE_MIN_CONCURRENT",
        "EXEC_CORE_MAX_CONCURRENT",
        "EXEC_CORE_INITIAL_CONCURRENT",
        "EXEC_CORE_SCALE_INTERVAL_MS",
        "EXEC_CORE_SAMPLE_WINDOW_MS",
        "EXEC_CORE_RETRY_BASE_MS",
        "EXEC_CORE_CACHE_MAX_SIZE",
        "EXEC_CORE_CACHE_MAX_ENTRIES",
        "EXEC_CORE_CACHE_DEFAULT_TTL_SECS",
        "EXEC_CORE_CACHE_CLEANUP_SECS",
        "EXEC_CORE_MAX_CONCURRENT_REQUESTS",
        "EXEC_CORE_SHUTDOWN_TIMEOUT",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.scheduler.min_concurrent, 1);
        assert!(cfg.scheduler.max_concurrent >= 2);
        assert_eq!(cfg.scheduler.initial_concurrent, cfg.scheduler.max_concurrent);
        assert_eq!(cfg.scheduler.scale_interval, Duration::from_secs(5));
        assert_eq!(cfg.scheduler.retry_base, Duration::from_secs(1));
        assert_eq!(cfg.cache.max_size, 50 * 1024 * 1024);
        assert_eq!(cfg.cache.max_entries, 1000);
        assert_eq!(cfg.cache.default_ttl, None);
        assert_eq!(cfg.max_concurrent_requests, 6);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EXEC_CORE_MIN_CONCURRENT", "2");
        std::env::set_var("EXEC_CORE_MAX_CONCURRENT", "16");
        std::env::set_var("EXEC_CORE_INITIAL_CONCURRENT", "4");
        std::env::set_var("EXEC_CORE_CACHE_DEFAULT_TTL_SECS", "300");
        std::env::set_var("EXEC_CORE_MAX_CONCURRENT_REQUESTS", "12");
        let cfg = load();
        assert_eq!(cfg.scheduler.min_concurrent, 2);
        assert_eq!(cfg.scheduler.max_concurrent, 16);
        assert_eq!(cfg.scheduler.initial_concurrent, 4);
        assert_eq!(cfg.cache.default_ttl, Some(Duration::from_secs(300)));
        assert_eq!(cfg.max_concurrent_requests, 12);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EXEC_CORE_CACHE_MAX_ENTRIES", "lots");
        std::env::set_var("EXEC_CORE_SHUTDOWN_TIMEOUT", "-5");
        let cfg = load();
        assert_eq!(cfg.cache.max_entries, 1000);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
        clear_env_vars();
    }

    #[test]
    fn test_bounds_are_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EXEC_CORE_MIN_CONCURRENT", "0");
        std::env::set_var("EXEC_CORE_MAX_CONCURRENT", "0");
        std::env::set_var("EXEC_CORE_INITIAL_CONCURRENT", "50");
        std::env::set_var("EXEC_CORE_SCALE_INTERVAL_MS", "1");
        std::env::set_var("EXEC_CORE_CACHE_MAX_SIZE", "0");
        let cfg = load();
        assert_eq!(cfg.scheduler.min_concurrent, 1);
        assert_eq!(cfg.scheduler.max_concurrent, 1);
        assert_eq!(cfg.scheduler.initial_concurrent, 1);
        assert_eq!(cfg.scheduler.scale_interval, Duration::from_millis(MIN_SCALE_INTERVAL_MS));
        assert_eq!(cfg.cache.max_size, MIN_CACHE_SIZE);
        clear_env_vars();
    }

    #[test]
    fn test_file_values_apply_under_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let file = write_toml(
            r#"
            [scheduler]
            max_concurrent = 10
            scale_interval_ms = 2000

            [cache]
            max_entries = 50

            [pipeline]
            max_concurrent_requests = 3
            "#,
        );
        std::env::set_var("EXEC_CORE_MAX_CONCURRENT_REQUESTS", "9");

        let cfg = load_file(file.path()).unwrap();
        assert_eq!(cfg.scheduler.max_concurrent, 10);
        assert_eq!(cfg.scheduler.scale_interval, Duration::from_secs(2));
        assert_eq!(cfg.cache.max_entries, 50);
        assert_eq!(cfg.max_concurrent_requests, 9);
        clear_env_vars();
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let file = write_toml("[scheduler]\nmax_concurency = 4\n");
        let err = load_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_file("/nonexistent/exec-core.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/exec-core.toml"));
    }

    #[test]
    fn test_effective_config_round_trips_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        let eff = cfg.effective_config();
        assert_eq!(eff.max_concurrent, cfg.scheduler.max_concurrent);
        assert_eq!(eff.scale_interval_ms, 5000);
        assert_eq!(eff.cache_default_ttl_secs, 0);
        assert_eq!(eff.entries().len(), ENV_KEYS.len());
    }

    #[test]
    fn test_pinned_concurrency_is_flagged() {
        let mut cfg = CoreConfig::default();
        cfg.scheduler.min_concurrent = 4;
        cfg.scheduler.max_concurrent = 4;
        assert!(cfg.warnings().iter().any(|w| w.contains("pinned")));
    }
}
