use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Provisioning counters kept by a coordinator
#[derive(Debug, Default)]
pub struct ProvisioningMetrics {
    pub sessions_created: AtomicU64,
    pub provisioning_started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub factory_resets: AtomicU64,
    pub duplicate_callbacks: AtomicU64,
    pub unsolicited_callbacks: AtomicU64,
    pub invalid_transitions: AtomicU64,
}

impl ProvisioningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning_started(&self) {
        self.provisioning_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_reset(&self) {
        self.factory_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_callback(&self) {
        self.duplicate_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsolicited_callback(&self) {
        self.unsolicited_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_transition(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> ProvisioningStats {
        ProvisioningStats {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            provisioning_started: self.provisioning_started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            factory_resets: self.factory_resets.load(Ordering::Relaxed),
            duplicate_callbacks: self.duplicate_callbacks.load(Ordering::Relaxed),
            unsolicited_callbacks: self.unsolicited_callbacks.load(Ordering::Relaxed),
            invalid_transitions: self.invalid_transitions.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            sessions_created = stats.sessions_created,
            provisioning_started = stats.provisioning_started,
            succeeded = stats.succeeded,
            failed = stats.failed,
            cancelled = stats.cancelled,
            factory_resets = stats.factory_resets,
            duplicate_callbacks = stats.duplicate_callbacks,
            unsolicited_callbacks = stats.unsolicited_callbacks,
            invalid_transitions = stats.invalid_transitions,
            "Provisioning metrics"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStats {
    pub sessions_created: u64,
    pub provisioning_started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub factory_resets: u64,
    pub duplicate_callbacks: u64,
    pub unsolicited_callbacks: u64,
    pub invalid_transitions: u64,
}
