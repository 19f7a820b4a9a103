//! Partition health metrics

use prometheus::{IntGauge, Opts, Registry};

use crate::error::{Error, ErrorKind, PartitionResult};
use crate::types::PartitionId;

const HEALTHY: i64 = 1;
const UNHEALTHY: i64 = 0;
const DEAD: i64 = -1;

/// Prometheus gauge mirroring the partition's health status.
pub struct HealthMetrics {
    gauge: IntGauge,
}

impl HealthMetrics {
    /// Registers the gauge for `partition_id` in the given registry.
    pub fn new(registry: &Registry, partition_id: PartitionId) -> PartitionResult<Self> {
        let gauge = IntGauge::with_opts(
            Opts::new(
                "treadle_partition_health",
                "Partition health: 1 healthy, 0 unhealthy, -1 dead",
            )
            .const_label("partition", partition_id.to_string()),
        )
        .map_err(|e| {
            Error::with_context(
                ErrorKind::Internal,
                format!("failed to create health gauge: {e}"),
            )
        })?;
        registry.register(Box::new(gauge.clone())).map_err(|e| {
            Error::with_context(
                ErrorKind::Internal,
                format!("failed to register health gauge: {e}"),
            )
        })?;

        gauge.set(UNHEALTHY);
        Ok(Self { gauge })
    }

    /// Reports the partition healthy.
    pub fn set_healthy(&self) {
        self.gauge.set(HEALTHY);
    }

    /// Reports the partition unhealthy.
    pub fn set_unhealthy(&self) {
        self.gauge.set(UNHEALTHY);
    }

    /// Reports the partition dead.
    pub fn set_dead(&self) {
        self.gauge.set(DEAD);
    }
}
