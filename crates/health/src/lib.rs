//! Health supervision for treadle components
//!
//! Health flows bottom-up: every component exposes a cheap status snapshot
//! through [`HealthMonitorable`], a [`HealthMonitor`] aggregates the statuses
//! of its registered children (worst wins), and [`FailureListener`]s are told
//! about status edges exactly once per transition.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod monitor;
mod status;
mod traits;

pub use monitor::HealthMonitor;
pub use status::HealthStatus;
pub use traits::{FailureListener, HealthMonitorable};
