//! Partition lifecycle configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one partition supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Period between health polls of registered components.
    #[serde(default = "default_health_check_tick")]
    pub health_check_tick: Duration,

    /// Optional timeout applied to each step's open during a transition.
    ///
    /// With no timeout configured the step's own behavior bounds the wait.
    #[serde(default)]
    pub step_open_timeout: Option<Duration>,
}

fn default_health_check_tick() -> Duration {
    Duration::from_secs(1)
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            health_check_tick: default_health_check_tick(),
            step_open_timeout: None,
        }
    }
}
