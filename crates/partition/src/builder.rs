//! Builder for the partition supervisor

use std::sync::Arc;

use prometheus::Registry;
use treadle_actor::Actor;
use treadle_health::HealthMonitor;

use crate::config::PartitionConfig;
use crate::consensus::ConsensusPartition;
use crate::context::PartitionContext;
use crate::error::{Error, PartitionResult};
use crate::listener::PartitionListener;
use crate::metrics::HealthMetrics;
use crate::partition_health::PartitionHealth;
use crate::services::ServiceFactory;
use crate::settings::{MemorySettingsStore, SettingsStore};
use crate::startup::StartupProcess;
use crate::steps::{self, PartitionStep};
use crate::supervisor::PartitionSupervisor;
use crate::transition::{PartitionTransition, TransitionEngine};
use crate::types::{NodeId, PartitionId};

/// Builder assembling a [`PartitionSupervisor`] and its collaborators.
///
/// A consensus partition is required; everything else has defaults: an
/// in-memory settings store, the default role step sets driven by the
/// configured service factory, the standard bootstrap steps and a private
/// metrics registry.
///
/// `build` spawns the supervisor's executor and must run within a tokio
/// runtime.
pub struct PartitionSupervisorBuilder {
    partition_id: PartitionId,
    node_id: NodeId,
    config: PartitionConfig,
    consensus: Option<Arc<dyn ConsensusPartition>>,
    factory: Option<Arc<dyn ServiceFactory>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    transition: Option<Arc<dyn PartitionTransition>>,
    listeners: Vec<Arc<dyn PartitionListener>>,
    bootstrap_steps: Option<Vec<PartitionStep>>,
    registry: Option<Registry>,
}

impl PartitionSupervisorBuilder {
    /// Starts a builder for the given replica.
    pub fn new(partition_id: PartitionId, node_id: NodeId) -> Self {
        Self {
            partition_id,
            node_id,
            config: PartitionConfig::default(),
            consensus: None,
            factory: None,
            settings_store: None,
            transition: None,
            listeners: Vec::new(),
            bootstrap_steps: None,
            registry: None,
        }
    }

    /// Sets the lifecycle configuration.
    pub fn with_config(mut self, config: PartitionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the consensus partition this replica belongs to. Required.
    pub fn with_consensus(mut self, consensus: Arc<dyn ConsensusPartition>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    /// Sets the factory the role steps use to construct services.
    pub fn with_service_factory(mut self, factory: Arc<dyn ServiceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the persistence medium for the partition settings.
    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Replaces the default transition engine, e.g. with a test double.
    pub fn with_transition(mut self, transition: Arc<dyn PartitionTransition>) -> Self {
        self.transition = Some(transition);
        self
    }

    /// Registers an external observer of role changes.
    pub fn with_listener(mut self, listener: Arc<dyn PartitionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replaces the default bootstrap steps.
    pub fn with_bootstrap_steps(mut self, steps: Vec<PartitionStep>) -> Self {
        self.bootstrap_steps = Some(steps);
        self
    }

    /// Registers the partition's metrics in the given registry instead of a
    /// private one.
    pub fn with_metrics_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Assembles the supervisor.
    pub fn build(self) -> PartitionResult<PartitionSupervisor> {
        let consensus = self
            .consensus
            .ok_or_else(|| Error::configuration("a consensus partition is required"))?;
        let settings_store = self
            .settings_store
            .unwrap_or_else(|| Arc::new(MemorySettingsStore::new()));

        let mut ctx = PartitionContext::new(self.partition_id, self.node_id, settings_store);
        if let Some(factory) = self.factory {
            ctx.set_service_factory(factory);
        }
        for listener in self.listeners {
            ctx.add_listener(listener);
        }
        let ctx = ctx.shared();

        let transition: Arc<dyn PartitionTransition> = match self.transition {
            Some(transition) => transition,
            None => Arc::new(TransitionEngine::new(ctx.clone(), &self.config)),
        };

        let actor = Actor::spawn(format!("partition-{}", self.partition_id));
        let monitor = HealthMonitor::new(
            format!("partition-{}", self.partition_id),
            self.config.health_check_tick,
            actor.clone(),
        );
        let partition_health = Arc::new(PartitionHealth::new(self.partition_id));
        let registry = self.registry.unwrap_or_default();
        let metrics = HealthMetrics::new(&registry, self.partition_id)?;
        let bootstrap = StartupProcess::new(
            format!("partition-{}-bootstrap", self.partition_id),
            self.bootstrap_steps.unwrap_or_else(steps::bootstrap_steps),
        );

        Ok(PartitionSupervisor::assemble(
            self.partition_id,
            actor,
            ctx,
            consensus,
            transition,
            monitor,
            partition_health,
            metrics,
            bootstrap,
        ))
    }
}
