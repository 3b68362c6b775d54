//! Tunables consumed by the delivery engine.
//!
//! Values are plain numbers so they can be layered from files and
//! environment variables by the owning agent; accessors convert them into
//! `Duration`s at the point of use.

use std::time::Duration;

use outpost_core::Feature;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Longest accepted suspension cool-down: 30 days.
pub const MAX_SUSPEND_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted idle wake-up interval: one minute.
pub const MAX_IDLE_TICK_MS: u64 = 60_000;

/// Longest accepted batch age: one day.
pub const MAX_BATCH_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// Per-feature queue and batch limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Whether the local configuration enables this feature.
    pub enabled: bool,
    /// Maximum payloads waiting in the queue before new ones are dropped.
    pub max_queue_size: usize,
    /// Payload count that seals a batch.
    pub batch_max_count: usize,
    /// Age of the oldest buffered payload that seals a batch.
    pub batch_max_age_ms: u64,
}

impl FeatureConfig {
    /// Limits for the given feature, using the engine defaults.
    pub fn for_feature(feature: Feature) -> Self {
        match feature {
            Feature::Errors => Self::new(100, 1, 1_000),
            Feature::Metrics => Self::new(1_000, 100, 60_000),
            Feature::Traces => Self::new(1_000, 100, 30_000),
            Feature::Events => Self::new(100_000, 1_000, 30_000),
        }
    }

    /// Enabled feature with the given limits.
    pub fn new(max_queue_size: usize, batch_max_count: usize, batch_max_age_ms: u64) -> Self {
        Self { enabled: true, max_queue_size, batch_max_count, batch_max_age_ms }
    }

    /// Batch age threshold as a duration.
    pub fn batch_max_age(&self) -> Duration {
        Duration::from_millis(self.batch_max_age_ms)
    }
}

/// Configuration for the delivery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Limits for application errors.
    pub errors: FeatureConfig,
    /// Limits for metric samples.
    pub metrics: FeatureConfig,
    /// Limits for trace spans.
    pub traces: FeatureConfig,
    /// Limits for structured events.
    pub events: FeatureConfig,
    /// Cool-down applied after a payment-required or forbidden response.
    pub suspend_duration_secs: u64,
    /// Growth factor of the throttle interval per rate-limit signal.
    pub throttle_base: f64,
    /// Disable the errors feature on 403 instead of suspending it.
    pub stop_on_unauthorized: bool,
    /// Longest a worker blocks on an empty queue before re-checking state.
    pub idle_tick_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            errors: FeatureConfig::for_feature(Feature::Errors),
            metrics: FeatureConfig::for_feature(Feature::Metrics),
            traces: FeatureConfig::for_feature(Feature::Traces),
            events: FeatureConfig::for_feature(Feature::Events),
            suspend_duration_secs: crate::DEFAULT_SUSPEND_SECONDS,
            throttle_base: crate::DEFAULT_THROTTLE_BASE,
            stop_on_unauthorized: false,
            idle_tick_ms: 1_000,
        }
    }
}

impl DeliveryConfig {
    /// Limits for one feature.
    pub fn feature(&self, feature: Feature) -> &FeatureConfig {
        match feature {
            Feature::Errors => &self.errors,
            Feature::Metrics => &self.metrics,
            Feature::Traces => &self.traces,
            Feature::Events => &self.events,
        }
    }

    /// Mutable limits for one feature.
    pub fn feature_mut(&mut self, feature: Feature) -> &mut FeatureConfig {
        match feature {
            Feature::Errors => &mut self.errors,
            Feature::Metrics => &mut self.metrics,
            Feature::Traces => &mut self.traces,
            Feature::Events => &mut self.events,
        }
    }

    /// Suspension cool-down as a duration.
    pub fn suspend_duration(&self) -> Duration {
        Duration::from_secs(self.suspend_duration_secs)
    }

    /// Idle wake-up interval as a duration.
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` describing the first
    /// invalid value.
    pub fn validate(&self) -> Result<()> {
        for feature in Feature::ALL {
            let limits = self.feature(feature);
            if limits.max_queue_size == 0 {
                return Err(DeliveryError::configuration(format!(
                    "{feature}.max_queue_size must be greater than 0"
                )));
            }
            if limits.batch_max_count == 0 {
                return Err(DeliveryError::configuration(format!(
                    "{feature}.batch_max_count must be greater than 0"
                )));
            }
            if limits.batch_max_age_ms > MAX_BATCH_AGE_MS {
                return Err(DeliveryError::configuration(format!(
                    "{feature}.batch_max_age_ms must not exceed {MAX_BATCH_AGE_MS}"
                )));
            }
        }

        if self.suspend_duration_secs == 0 || self.suspend_duration_secs > MAX_SUSPEND_SECONDS {
            return Err(DeliveryError::configuration(format!(
                "suspend_duration_secs must be between 1 and {MAX_SUSPEND_SECONDS}"
            )));
        }

        if !self.throttle_base.is_finite() || self.throttle_base <= 1.0 {
            return Err(DeliveryError::configuration("throttle_base must be greater than 1.0"));
        }

        if self.idle_tick_ms == 0 || self.idle_tick_ms > MAX_IDLE_TICK_MS {
            return Err(DeliveryError::configuration(format!(
                "idle_tick_ms must be between 1 and {MAX_IDLE_TICK_MS}"
            )));
        }

        Ok(())
    }
}
