//! Health status lattice

use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of a component, ordered from best to worst.
///
/// The ordering makes aggregation a `max`: the health of a tree is the worst
/// health among its members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is operating normally.
    #[default]
    Healthy,
    /// Component is failing but may recover.
    Unhealthy,
    /// Component failed and must not attempt recovery on this node.
    Dead,
}

impl HealthStatus {
    /// Returns the worse of the two statuses.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// True if the status is [`HealthStatus::Healthy`].
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }

    /// True if the status is [`HealthStatus::Dead`].
    pub fn is_dead(self) -> bool {
        self == Self::Dead
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_wins() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Healthy), Healthy);
        assert_eq!(Healthy.worst(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.worst(Healthy), Unhealthy);
        assert_eq!(Unhealthy.worst(Dead), Dead);
        assert_eq!(Dead.worst(Healthy), Dead);
    }
}
