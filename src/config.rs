//! Agent configuration.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use outpost_core::Feature;
use outpost_delivery::{DeliveryConfig, FeatureConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "outpost.toml";
const ENV_PREFIX: &str = "OUTPOST_";

/// Complete agent configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `OUTPOST_` (highest priority)
/// 2. Configuration file (`outpost.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use outpost::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("events queue holds {} payloads", config.events_max_queue_size);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Agent
    /// Send data to the ingestion service. When false every batch is
    /// answered locally with a stubbed response.
    ///
    /// Environment variable: `OUTPOST_REPORT_DATA`
    pub report_data: bool,
    /// Log every batch at debug level before it is delivered.
    ///
    /// Environment variable: `OUTPOST_DEBUG`
    pub debug: bool,

    // Errors
    /// Environment variable: `OUTPOST_ERRORS_ENABLED`
    pub errors_enabled: bool,
    /// Environment variable: `OUTPOST_ERRORS_MAX_QUEUE_SIZE`
    pub errors_max_queue_size: usize,
    /// Environment variable: `OUTPOST_ERRORS_BATCH_MAX_COUNT`
    pub errors_batch_max_count: usize,
    /// Environment variable: `OUTPOST_ERRORS_BATCH_MAX_AGE_MS`
    pub errors_batch_max_age_ms: u64,

    // Metrics
    /// Environment variable: `OUTPOST_METRICS_ENABLED`
    pub metrics_enabled: bool,
    /// Environment variable: `OUTPOST_METRICS_MAX_QUEUE_SIZE`
    pub metrics_max_queue_size: usize,
    /// Environment variable: `OUTPOST_METRICS_BATCH_MAX_COUNT`
    pub metrics_batch_max_count: usize,
    /// Environment variable: `OUTPOST_METRICS_BATCH_MAX_AGE_MS`
    pub metrics_batch_max_age_ms: u64,

    // Traces
    /// Environment variable: `OUTPOST_TRACES_ENABLED`
    pub traces_enabled: bool,
    /// Environment variable: `OUTPOST_TRACES_MAX_QUEUE_SIZE`
    pub traces_max_queue_size: usize,
    /// Environment variable: `OUTPOST_TRACES_BATCH_MAX_COUNT`
    pub traces_batch_max_count: usize,
    /// Environment variable: `OUTPOST_TRACES_BATCH_MAX_AGE_MS`
    pub traces_batch_max_age_ms: u64,

    // Events
    /// Environment variable: `OUTPOST_EVENTS_ENABLED`
    pub events_enabled: bool,
    /// Environment variable: `OUTPOST_EVENTS_MAX_QUEUE_SIZE`
    pub events_max_queue_size: usize,
    /// Environment variable: `OUTPOST_EVENTS_BATCH_MAX_COUNT`
    pub events_batch_max_count: usize,
    /// Environment variable: `OUTPOST_EVENTS_BATCH_MAX_AGE_MS`
    pub events_batch_max_age_ms: u64,

    // Delivery control
    /// Seconds to stop delivering after a payment or authorization failure.
    ///
    /// Environment variable: `OUTPOST_SUSPEND_DURATION_SECS`
    pub suspend_duration_secs: u64,
    /// Growth factor of the throttle curve.
    ///
    /// Environment variable: `OUTPOST_THROTTLE_BASE`
    pub throttle_base: f64,
    /// Disable error reporting for good on 403 instead of suspending it.
    ///
    /// Environment variable: `OUTPOST_STOP_ON_UNAUTHORIZED`
    pub stop_on_unauthorized: bool,
    /// Longest a worker sleeps before re-checking batch age.
    ///
    /// Environment variable: `OUTPOST_IDLE_TICK_MS`
    pub idle_tick_ms: u64,
}

impl Config {
    /// Load configuration from defaults, `outpost.toml`, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like `load`, reading the file at `path` instead of `outpost.toml`.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the delivery crate's configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        let feature = |enabled, max_queue_size, batch_max_count, batch_max_age_ms| FeatureConfig {
            enabled,
            ..FeatureConfig::new(max_queue_size, batch_max_count, batch_max_age_ms)
        };

        DeliveryConfig {
            errors: feature(
                self.errors_enabled,
                self.errors_max_queue_size,
                self.errors_batch_max_count,
                self.errors_batch_max_age_ms,
            ),
            metrics: feature(
                self.metrics_enabled,
                self.metrics_max_queue_size,
                self.metrics_batch_max_count,
                self.metrics_batch_max_age_ms,
            ),
            traces: feature(
                self.traces_enabled,
                self.traces_max_queue_size,
                self.traces_batch_max_count,
                self.traces_batch_max_age_ms,
            ),
            events: feature(
                self.events_enabled,
                self.events_max_queue_size,
                self.events_batch_max_count,
                self.events_batch_max_age_ms,
            ),
            suspend_duration_secs: self.suspend_duration_secs,
            throttle_base: self.throttle_base,
            stop_on_unauthorized: self.stop_on_unauthorized,
            idle_tick_ms: self.idle_tick_ms,
        }
    }

    /// Whether `feature` is enabled locally.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Errors => self.errors_enabled,
            Feature::Metrics => self.metrics_enabled,
            Feature::Traces => self.traces_enabled,
            Feature::Events => self.events_enabled,
        }
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        self.to_delivery_config().validate().context("Invalid delivery configuration")?;
        Ok(())
    }
}

impl From<&DeliveryConfig> for Config {
    fn from(delivery: &DeliveryConfig) -> Self {
        Self {
            report_data: true,
            debug: false,
            errors_enabled: delivery.errors.enabled,
            errors_max_queue_size: delivery.errors.max_queue_size,
            errors_batch_max_count: delivery.errors.batch_max_count,
            errors_batch_max_age_ms: delivery.errors.batch_max_age_ms,
            metrics_enabled: delivery.metrics.enabled,
            metrics_max_queue_size: delivery.metrics.max_queue_size,
            metrics_batch_max_count: delivery.metrics.batch_max_count,
            metrics_batch_max_age_ms: delivery.metrics.batch_max_age_ms,
            traces_enabled: delivery.traces.enabled,
            traces_max_queue_size: delivery.traces.max_queue_size,
            traces_batch_max_count: delivery.traces.batch_max_count,
            traces_batch_max_age_ms: delivery.traces.batch_max_age_ms,
            events_enabled: delivery.events.enabled,
            events_max_queue_size: delivery.events.max_queue_size,
            events_batch_max_count: delivery.events.batch_max_count,
            events_batch_max_age_ms: delivery.events.batch_max_age_ms,
            suspend_duration_secs: delivery.suspend_duration_secs,
            throttle_base: delivery.throttle_base,
            stop_on_unauthorized: delivery.stop_on_unauthorized,
            idle_tick_ms: delivery.idle_tick_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, fs, path::PathBuf, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("outpost-{}-{name}.toml", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    fn missing_file() -> PathBuf {
        env::temp_dir().join(format!("outpost-{}-missing.toml", std::process::id()))
    }

    #[test]
    fn defaults_match_delivery_defaults() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert!(config.report_data);
        assert!(!config.debug);
        assert_eq!(config.to_delivery_config(), DeliveryConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _guard = TestEnvGuard::new();
        let config = Config::load_from(missing_file()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let _guard = TestEnvGuard::new();
        let path = temp_file(
            "file",
            "report_data = false\nevents_max_queue_size = 500\nthrottle_base = 1.5\n",
        );

        let config = Config::load_from(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(!config.report_data);
        assert_eq!(config.events_max_queue_size, 500);
        assert!((config.throttle_base - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.metrics_max_queue_size, 1000);
    }

    #[test]
    fn env_overrides_file() {
        let mut guard = TestEnvGuard::new();
        let path = temp_file("env", "errors_max_queue_size = 10\n");
        guard.set_var("OUTPOST_ERRORS_MAX_QUEUE_SIZE", "25");
        guard.set_var("OUTPOST_TRACES_ENABLED", "false");
        guard.set_var("OUTPOST_STOP_ON_UNAUTHORIZED", "true");

        let config = Config::load_from(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.errors_max_queue_size, 25);
        assert!(!config.is_enabled(Feature::Traces));
        assert!(config.stop_on_unauthorized);

        let delivery = config.to_delivery_config();
        assert_eq!(delivery.errors.max_queue_size, 25);
        assert!(!delivery.traces.enabled);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("OUTPOST_EVENTS_BATCH_MAX_COUNT", "0");

        let err = Config::load_from(missing_file()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid delivery configuration"));
    }

    #[test]
    fn zero_suspension_is_rejected() {
        let config = Config { suspend_duration_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unbounded_durations_are_rejected() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("OUTPOST_SUSPEND_DURATION_SECS", &u64::MAX.to_string());

        let err = Config::load_from(missing_file()).unwrap_err();
        assert!(format!("{err:#}").contains("suspend_duration_secs"));

        let config = Config { idle_tick_ms: u64::MAX, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
