//! Per-feature enablement shared by the supervisor and its workers.
//!
//! A feature accepts data only when all three sources agree: the local
//! configuration enables it, the ingestion service advertised it in the last
//! ping, and no fatal response revoked it.

use std::sync::atomic::{AtomicBool, Ordering};

use outpost_core::Feature;

use crate::config::DeliveryConfig;

#[derive(Debug)]
struct FeatureSlot {
    local: AtomicBool,
    server: AtomicBool,
    revoked: AtomicBool,
}

impl FeatureSlot {
    fn new(local: bool) -> Self {
        Self {
            local: AtomicBool::new(local),
            server: AtomicBool::new(true),
            revoked: AtomicBool::new(false),
        }
    }
}

/// Lock-free enablement table read before every enqueue.
#[derive(Debug)]
pub struct FeatureFlags {
    slots: [FeatureSlot; 4],
}

impl FeatureFlags {
    /// Every feature enabled.
    pub fn all_enabled() -> Self {
        Self { slots: Feature::ALL.map(|_| FeatureSlot::new(true)) }
    }

    /// Overwrites local enablement with the configured values.
    pub fn apply_config(&self, config: &DeliveryConfig) {
        for feature in Feature::ALL {
            self.set_local_enabled(feature, config.feature(feature).enabled);
        }
    }

    fn slot(&self, feature: Feature) -> &FeatureSlot {
        &self.slots[feature.index()]
    }

    /// Whether `feature` currently accepts data.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        let slot = self.slot(feature);
        slot.local.load(Ordering::Acquire)
            && slot.server.load(Ordering::Acquire)
            && !slot.revoked.load(Ordering::Acquire)
    }

    /// Records whether the ingestion service enables `feature`.
    pub fn set_server_enabled(&self, feature: Feature, enabled: bool) {
        self.slot(feature).server.store(enabled, Ordering::Release);
    }

    /// Overrides the local configuration for `feature`.
    pub fn set_local_enabled(&self, feature: Feature, enabled: bool) {
        self.slot(feature).local.store(enabled, Ordering::Release);
    }

    /// Permanently disables `feature` after a fatal response.
    pub fn revoke(&self, feature: Feature) {
        self.slot(feature).revoked.store(true, Ordering::Release);
    }

    /// Whether a fatal response revoked `feature`.
    pub fn is_revoked(&self, feature: Feature) -> bool {
        self.slot(feature).revoked.load(Ordering::Acquire)
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::all_enabled()
    }
}
