//! Partition-level health source

use std::sync::atomic::{AtomicBool, Ordering};

use treadle_health::{HealthMonitorable, HealthStatus};

use crate::types::PartitionId;

/// The supervisor's own health source, registered alongside the child
/// components it monitors.
///
/// The partition is unhealthy until its role services are installed, while
/// disk space is unavailable, and forever once marked dead.
pub struct PartitionHealth {
    name: String,
    services_installed: AtomicBool,
    disk_space_available: AtomicBool,
    dead: AtomicBool,
}

impl PartitionHealth {
    /// Creates the health source for `partition_id`.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            name: format!("partition-{partition_id}"),
            services_installed: AtomicBool::new(false),
            disk_space_available: AtomicBool::new(true),
            dead: AtomicBool::new(false),
        }
    }

    /// Component name under which this source is registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records whether the current role's services are installed.
    pub fn set_services_installed(&self, installed: bool) {
        self.services_installed.store(installed, Ordering::SeqCst);
    }

    /// Records the disk space gate.
    pub fn set_disk_space_available(&self, available: bool) {
        self.disk_space_available.store(available, Ordering::SeqCst);
    }

    /// Marks the partition dead. The latch never resets.
    pub fn set_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

impl HealthMonitorable for PartitionHealth {
    fn health_status(&self) -> HealthStatus {
        if self.dead.load(Ordering::SeqCst) {
            HealthStatus::Dead
        } else if !self.services_installed.load(Ordering::SeqCst)
            || !self.disk_space_available.load(Ordering::SeqCst)
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_install_state_and_disk_gate() {
        let health = PartitionHealth::new(PartitionId(1));
        assert_eq!(health.health_status(), HealthStatus::Unhealthy);

        health.set_services_installed(true);
        assert_eq!(health.health_status(), HealthStatus::Healthy);

        health.set_disk_space_available(false);
        assert_eq!(health.health_status(), HealthStatus::Unhealthy);

        health.set_disk_space_available(true);
        assert_eq!(health.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn dead_latch_never_resets() {
        let health = PartitionHealth::new(PartitionId(1));
        health.set_services_installed(true);
        health.set_dead();
        assert_eq!(health.health_status(), HealthStatus::Dead);

        health.set_services_installed(true);
        health.set_disk_space_available(true);
        assert_eq!(health.health_status(), HealthStatus::Dead);
    }
}
