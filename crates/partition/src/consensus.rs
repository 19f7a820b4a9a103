//! Consensus collaborator interfaces
//!
//! The partition lifecycle does not implement consensus. It observes role
//! changes emitted by the consensus module for its log group and asks it to
//! step down or go inactive when service installation fails.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use treadle_health::HealthMonitorable;

use crate::error::PartitionResult;

/// This replica's standing in its consensus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Not participating in the group.
    Inactive,
    /// Receives the log but cannot vote or be elected.
    Passive,
    /// Votes and replicates the log.
    Follower,
    /// Campaigning for leadership.
    Candidate,
    /// Catching up before becoming a voting member.
    Promotable,
    /// Leads the group and accepts writes.
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Passive => write!(f, "passive"),
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Promotable => write!(f, "promotable"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Observer of consensus role changes.
///
/// Called from the consensus module's own threads; implementations bounce
/// onto their executor.
pub trait RoleChangeListener: Send + Sync {
    /// The replica's role changed to `role` in `term`.
    fn on_new_role(&self, role: Role, term: u64);
}

/// Handle to the consensus module for one log group.
#[async_trait]
pub trait ConsensusPartition: HealthMonitorable + Send + Sync {
    /// Name of the consensus partition, used as its health component name.
    fn name(&self) -> &str;

    /// Current role of this replica.
    fn role(&self) -> Role;

    /// Current consensus term of this replica.
    fn term(&self) -> u64;

    /// Registers an observer of role changes.
    fn add_role_change_listener(&self, listener: Arc<dyn RoleChangeListener>);

    /// Removes a previously registered observer, matched by identity.
    fn remove_role_change_listener(&self, listener: &Arc<dyn RoleChangeListener>);

    /// Asks the leader to relinquish leadership; consensus will emit a
    /// follower role change once it has stepped down.
    async fn step_down(&self) -> PartitionResult<()>;

    /// Asks this replica to leave the group; consensus will emit an inactive
    /// role change.
    async fn go_inactive(&self) -> PartitionResult<()>;
}
