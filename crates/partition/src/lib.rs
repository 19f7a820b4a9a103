//! Partition lifecycle core for the treadle workflow engine
//!
//! A treadle partition is one replica of a horizontally sharded workflow
//! engine, bound to one consensus log group. This crate coordinates the
//! lifecycle of such a replica:
//!
//! - a [`startup::StartupProcess`] runs ordered install steps and reverses
//!   them on teardown, surviving partial failure;
//! - a [`transition::TransitionEngine`] maps consensus role changes to the
//!   install/teardown plan for the target role;
//! - a [`supervisor::PartitionSupervisor`] owns the role state machine,
//!   reacts to role changes, supervises health and recovers from failures.
//!
//! Consensus itself, log storage and the individual services (record
//! processor, exporters, snapshots, key-value store) are external
//! collaborators consumed through the traits in [`consensus`] and
//! [`services`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod consensus;
pub mod context;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod partition_health;
pub mod services;
pub mod settings;
pub mod startup;
pub mod steps;
pub mod supervisor;
pub mod transition;
pub mod types;

pub use {
    builder::PartitionSupervisorBuilder,
    config::PartitionConfig,
    consensus::{ConsensusPartition, Role, RoleChangeListener},
    context::{PartitionContext, SharedContext},
    error::{Error, ErrorKind, PartitionResult},
    listener::PartitionListener,
    startup::{StartupProcess, StartupStep},
    supervisor::PartitionSupervisor,
    transition::PartitionTransition,
    types::{NodeId, PartitionId},
};
