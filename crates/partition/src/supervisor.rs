//! Partition supervisor
//!
//! Owns the role state machine of one partition replica. Consensus role
//! changes, health callbacks, disk notifications and the control API all
//! bounce onto the supervisor's executor, where transitions run strictly one
//! at a time: a role change arriving while a transition is in flight queues
//! behind it.
//!
//! Failed installations are classified: plain failures hand recovery back to
//! consensus (step down as leader, go inactive as follower) instead of
//! retrying locally; unrecoverable failures drive the partition inactive,
//! mark it dead and leave only status queries and [`PartitionSupervisor::close`]
//! operational.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use treadle_actor::Actor;
use treadle_health::{FailureListener, HealthMonitor, HealthMonitorable, HealthStatus};

use crate::consensus::{ConsensusPartition, Role, RoleChangeListener};
use crate::context::SharedContext;
use crate::error::{Error, PartitionResult};
use crate::metrics::HealthMetrics;
use crate::partition_health::PartitionHealth;
use crate::services::{ExporterDirector, StreamProcessor};
use crate::startup::StartupProcess;
use crate::transition::PartitionTransition;
use crate::types::PartitionId;

#[derive(Default)]
struct SupervisorState {
    current_role: Option<Role>,
    closing: bool,
    dead: bool,
}

struct SupervisorShared {
    partition_id: PartitionId,
    actor: Actor,
    ctx: SharedContext,
    consensus: Arc<dyn ConsensusPartition>,
    transition: Arc<dyn PartitionTransition>,
    monitor: HealthMonitor,
    partition_health: Arc<PartitionHealth>,
    metrics: HealthMetrics,
    bootstrap: StartupProcess<SharedContext>,
    state: Mutex<SupervisorState>,
    failure_listeners: Mutex<Vec<Arc<dyn FailureListener>>>,
    role_listener: Mutex<Option<Arc<dyn RoleChangeListener>>>,
    close_result: AsyncMutex<Option<Result<(), Arc<Error>>>>,
}

/// Supervises the lifecycle of one partition replica.
pub struct PartitionSupervisor {
    shared: Arc<SupervisorShared>,
}

impl PartitionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        partition_id: PartitionId,
        actor: Actor,
        ctx: SharedContext,
        consensus: Arc<dyn ConsensusPartition>,
        transition: Arc<dyn PartitionTransition>,
        monitor: HealthMonitor,
        partition_health: Arc<PartitionHealth>,
        metrics: HealthMetrics,
        bootstrap: StartupProcess<SharedContext>,
    ) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                partition_id,
                actor,
                ctx,
                consensus,
                transition,
                monitor,
                partition_health,
                metrics,
                bootstrap,
                state: Mutex::new(SupervisorState::default()),
                failure_listeners: Mutex::new(Vec::new()),
                role_listener: Mutex::new(None),
                close_result: AsyncMutex::new(None),
            }),
        }
    }

    /// Partition identifier.
    pub fn partition_id(&self) -> PartitionId {
        self.shared.partition_id
    }

    /// Boots the partition: registers the role-change listener with
    /// consensus, arms health monitoring, runs the bootstrap steps and syncs
    /// with the consensus role current at that point.
    ///
    /// A bootstrap failure is terminal; the partition is marked dead.
    pub async fn start(&self) -> PartitionResult<()> {
        let shared = self.shared.clone();
        self.shared
            .actor
            .call_async(move || Self::bootstrap(shared))
            .await
            .map_err(Error::from)?
    }

    async fn bootstrap(shared: Arc<SupervisorShared>) -> PartitionResult<()> {
        info!(partition = %shared.partition_id, "starting partition");

        let role_listener: Arc<dyn RoleChangeListener> = Arc::new(RoleChangeBridge {
            shared: Arc::downgrade(&shared),
        });
        shared.consensus.add_role_change_listener(role_listener.clone());
        *shared
            .role_listener
            .lock()
            .expect("supervisor lock poisoned") = Some(role_listener);

        let failure_bridge: Arc<dyn FailureListener> = Arc::new(FailureBridge {
            shared: Arc::downgrade(&shared),
        });
        shared.monitor.add_failure_listener(failure_bridge);
        shared.monitor.register_component(
            shared.consensus.name().to_string(),
            Arc::new(ConsensusHealth(shared.consensus.clone())),
        );
        shared.monitor.register_component(
            shared.partition_health.name().to_string(),
            shared.partition_health.clone(),
        );
        shared.monitor.start_monitoring();

        match shared.bootstrap.startup(shared.ctx.clone()).await {
            Ok(_) => {
                info!(partition = %shared.partition_id, "partition bootstrap complete");
                let (role, term) = (shared.consensus.role(), shared.consensus.term());
                Self::handle_role_change(shared.clone(), role, term).await;
                Ok(())
            }
            Err(error) => {
                error!(partition = %shared.partition_id, %error, "partition bootstrap failed");
                shared.state.lock().expect("supervisor lock poisoned").dead = true;
                shared.partition_health.set_dead();
                shared.metrics.set_dead();
                Err(error)
            }
        }
    }

    /// Reports a consensus role change. May be called from any thread; the
    /// transition runs on the supervisor's executor.
    pub fn on_new_role(&self, role: Role, term: u64) {
        let shared = self.shared.clone();
        self.shared
            .actor
            .run_async(move || Self::handle_role_change(shared, role, term));
    }

    async fn handle_role_change(shared: Arc<SupervisorShared>, new_role: Role, new_term: u64) {
        let current = {
            let state = shared.state.lock().expect("supervisor lock poisoned");
            if state.closing || state.dead {
                debug!(
                    partition = %shared.partition_id,
                    role = %new_role,
                    term = new_term,
                    "ignoring role change"
                );
                return;
            }
            state.current_role
        };

        debug!(
            partition = %shared.partition_id,
            from = ?current,
            to = %new_role,
            term = new_term,
            "partition role change"
        );

        match new_role {
            Role::Leader => {
                if current != Some(Role::Leader) {
                    Self::leader_transition(&shared, new_term).await;
                }
            }
            Role::Inactive => Self::inactive_transition(&shared).await,
            // Passive, promotable and candidate replicas run follower
            // services.
            _ => {
                if current.is_none() || current == Some(Role::Leader) {
                    Self::follower_transition(&shared, new_term).await;
                }
            }
        }

        shared
            .state
            .lock()
            .expect("supervisor lock poisoned")
            .current_role = Some(new_role);
    }

    async fn leader_transition(shared: &Arc<SupervisorShared>, term: u64) {
        shared.ctx.write().await.stamp_role(Role::Leader, term);
        match shared.transition.to_leader(term).await {
            Ok(()) => {
                let (partition_id, log_stream, listeners) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.partition_id(), ctx.log_stream(), ctx.listeners().to_vec())
                };
                let notified = futures::future::try_join_all(
                    listeners
                        .iter()
                        .map(|l| l.on_becoming_leader(partition_id, term, log_stream.clone())),
                )
                .await;
                match notified {
                    Ok(_) => shared.partition_health.set_services_installed(true),
                    Err(error) => {
                        error!(
                            partition = %partition_id,
                            %error,
                            "partition listener failed after leader install"
                        );
                        Self::on_install_failure(shared, error).await;
                    }
                }
            }
            Err(error) => {
                error!(
                    partition = %shared.partition_id,
                    %error,
                    "failed to install leader partition"
                );
                Self::on_install_failure(shared, error).await;
            }
        }
    }

    async fn follower_transition(shared: &Arc<SupervisorShared>, term: u64) {
        shared.ctx.write().await.stamp_role(Role::Follower, term);
        match shared.transition.to_follower(term).await {
            Ok(()) => {
                let (partition_id, listeners) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.partition_id(), ctx.listeners().to_vec())
                };
                let notified = futures::future::try_join_all(
                    listeners
                        .iter()
                        .map(|l| l.on_becoming_follower(partition_id, term)),
                )
                .await;
                match notified {
                    Ok(_) => shared.partition_health.set_services_installed(true),
                    Err(error) => {
                        error!(
                            partition = %partition_id,
                            %error,
                            "partition listener failed after follower install"
                        );
                        Self::on_install_failure(shared, error).await;
                    }
                }
            }
            Err(error) => {
                error!(
                    partition = %shared.partition_id,
                    %error,
                    "failed to install follower partition"
                );
                Self::on_install_failure(shared, error).await;
            }
        }
    }

    async fn inactive_transition(shared: &Arc<SupervisorShared>) {
        shared.partition_health.set_services_installed(false);
        {
            let mut ctx = shared.ctx.write().await;
            let term = ctx.current_term();
            ctx.stamp_role(Role::Inactive, term);
        }
        if let Err(error) = shared.transition.to_inactive().await {
            error!(
                partition = %shared.partition_id,
                %error,
                "failed to transition partition to inactive"
            );
        }
    }

    async fn on_install_failure(shared: &Arc<SupervisorShared>, error: Error) {
        if error.is_unrecoverable() {
            error!(
                partition = %shared.partition_id,
                %error,
                "partition failed with an unrecoverable error"
            );
            Self::handle_unrecoverable_failure(shared).await;
        } else {
            Self::handle_recoverable_failure(shared).await;
        }
    }

    async fn handle_recoverable_failure(shared: &Arc<SupervisorShared>) {
        shared.partition_health.set_services_installed(false);
        let (partition_id, role, term) = {
            let ctx = shared.ctx.read().await;
            (ctx.partition_id(), ctx.current_role(), ctx.current_term())
        };
        Self::notify_becoming_inactive(shared, term).await;

        // If consensus already moved to a newer term the transition for that
        // term is queued and will reinstall services; recovery is otherwise
        // driven by the next role change, never by a local retry.
        if role == Some(Role::Leader) && term == shared.consensus.term() {
            info!(
                partition = %partition_id,
                term,
                "unexpected failure while leader, stepping down"
            );
            if let Err(error) = shared.consensus.step_down().await {
                warn!(partition = %partition_id, %error, "step down request failed");
            }
        } else if role == Some(Role::Follower) {
            info!(
                partition = %partition_id,
                term,
                "unexpected failure while follower, going inactive"
            );
            if let Err(error) = shared.consensus.go_inactive().await {
                warn!(partition = %partition_id, %error, "go inactive request failed");
            }
        }
    }

    async fn handle_unrecoverable_failure(shared: &Arc<SupervisorShared>) {
        {
            let mut state = shared.state.lock().expect("supervisor lock poisoned");
            if state.dead {
                return;
            }
            state.dead = true;
        }
        shared.metrics.set_dead();
        shared.partition_health.set_services_installed(false);
        shared.partition_health.set_dead();

        let term = shared.ctx.read().await.current_term();
        if let Err(error) = shared.transition.to_inactive().await {
            error!(
                partition = %shared.partition_id,
                %error,
                "failed to transition partition to inactive"
            );
        }
        if let Err(error) = shared.consensus.go_inactive().await {
            warn!(partition = %shared.partition_id, %error, "go inactive request failed");
        }

        let listeners = shared
            .failure_listeners
            .lock()
            .expect("supervisor lock poisoned")
            .clone();
        for listener in listeners {
            listener.on_unrecoverable_failure();
        }
        Self::notify_becoming_inactive(shared, term).await;
    }

    async fn notify_becoming_inactive(shared: &Arc<SupervisorShared>, term: u64) {
        let (partition_id, listeners) = {
            let ctx = shared.ctx.read().await;
            (ctx.partition_id(), ctx.listeners().to_vec())
        };
        let results = futures::future::join_all(
            listeners
                .iter()
                .map(|l| l.on_becoming_inactive(partition_id, term)),
        )
        .await;
        for result in results {
            if let Err(error) = result {
                warn!(
                    partition = %partition_id,
                    %error,
                    "partition listener failed while becoming inactive"
                );
            }
        }
    }

    fn handle_monitor_failure(shared: &Arc<SupervisorShared>) {
        shared.metrics.set_unhealthy();
        let listeners = shared
            .failure_listeners
            .lock()
            .expect("supervisor lock poisoned")
            .clone();
        for listener in listeners {
            listener.on_failure();
        }
    }

    fn handle_monitor_recovery(shared: &Arc<SupervisorShared>) {
        shared.metrics.set_healthy();
        let listeners = shared
            .failure_listeners
            .lock()
            .expect("supervisor lock poisoned")
            .clone();
        for listener in listeners {
            listener.on_recovered();
        }
    }

    /// Closes the partition: tears role services down, reverses the
    /// bootstrap steps and stops the executor. Role changes arriving after
    /// the close was requested are ignored. Idempotent; the first call tears
    /// down and every caller observes that teardown's outcome.
    pub async fn close(&self) -> PartitionResult<()> {
        self.shared
            .state
            .lock()
            .expect("supervisor lock poisoned")
            .closing = true;

        let mut outcome = self.shared.close_result.lock().await;
        if let Some(result) = outcome.as_ref() {
            return match result {
                Ok(()) => Ok(()),
                Err(error) => Err(Error::shared(error)),
            };
        }

        let shared = self.shared.clone();
        let result = match self
            .shared
            .actor
            .call_async(move || Self::do_close(shared))
            .await
        {
            Ok(result) => result,
            Err(error) => Err(Error::from(error)),
        };
        self.shared.actor.shutdown();
        self.shared.actor.closed().await;

        let result = result.map_err(Arc::new);
        let returned = match &result {
            Ok(()) => Ok(()),
            Err(error) => Err(Error::shared(error)),
        };
        *outcome = Some(result);
        returned
    }

    async fn do_close(shared: Arc<SupervisorShared>) -> PartitionResult<()> {
        debug!(partition = %shared.partition_id, "closing partition");

        if let Err(error) = shared.transition.to_inactive().await {
            warn!(
                partition = %shared.partition_id,
                %error,
                "failed to tear role services down during close"
            );
        }

        if let Some(listener) = shared
            .role_listener
            .lock()
            .expect("supervisor lock poisoned")
            .take()
        {
            shared.consensus.remove_role_change_listener(&listener);
        }
        shared.monitor.remove_component(shared.consensus.name());
        shared.monitor.remove_component(shared.partition_health.name());

        let result = shared
            .bootstrap
            .shutdown(shared.ctx.clone())
            .await
            .map(|_| ());
        shared.monitor.stop();
        info!(partition = %shared.partition_id, "partition closed");
        result
    }

    /// Pauses record processing; the pause is persisted before the running
    /// processor is touched, so it survives restarts.
    pub async fn pause_processing(&self) -> PartitionResult<()> {
        let shared = self.shared.clone();
        self.shared
            .actor
            .call_async(move || async move {
                let (store, mut settings) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.settings_store(), ctx.settings())
                };
                settings.processing_paused = true;
                store.store(settings).await?;
                let processor = {
                    let mut ctx = shared.ctx.write().await;
                    ctx.set_settings(settings);
                    ctx.stream_processor()
                };
                if let Some(processor) = processor {
                    processor.pause_processing().await?;
                }
                Ok(())
            })
            .await
            .map_err(Error::from)?
    }

    /// Resumes record processing. The processor only resumes when nothing
    /// else holds it paused (i.e. disk space is available).
    pub async fn resume_processing(&self) -> PartitionResult<()> {
        let shared = self.shared.clone();
        self.shared
            .actor
            .call_async(move || async move {
                let (store, mut settings) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.settings_store(), ctx.settings())
                };
                settings.processing_paused = false;
                store.store(settings).await?;
                let (processor, should_process) = {
                    let mut ctx = shared.ctx.write().await;
                    ctx.set_settings(settings);
                    (ctx.stream_processor(), ctx.should_process())
                };
                if let Some(processor) = processor {
                    if should_process {
                        processor.resume_processing().await?;
                    }
                }
                Ok(())
            })
            .await
            .map_err(Error::from)?
    }

    /// Pauses exporting; persisted like [`PartitionSupervisor::pause_processing`].
    pub async fn pause_exporting(&self) -> PartitionResult<()> {
        let shared = self.shared.clone();
        self.shared
            .actor
            .call_async(move || async move {
                let (store, mut settings) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.settings_store(), ctx.settings())
                };
                settings.exporting_paused = true;
                store.store(settings).await?;
                let director = {
                    let mut ctx = shared.ctx.write().await;
                    ctx.set_settings(settings);
                    ctx.exporter_director()
                };
                if let Some(director) = director {
                    director.pause_exporting().await?;
                }
                Ok(())
            })
            .await
            .map_err(Error::from)?
    }

    /// Resumes exporting.
    pub async fn resume_exporting(&self) -> PartitionResult<()> {
        let shared = self.shared.clone();
        self.shared
            .actor
            .call_async(move || async move {
                let (store, mut settings) = {
                    let ctx = shared.ctx.read().await;
                    (ctx.settings_store(), ctx.settings())
                };
                settings.exporting_paused = false;
                store.store(settings).await?;
                let (director, should_export) = {
                    let mut ctx = shared.ctx.write().await;
                    ctx.set_settings(settings);
                    (ctx.exporter_director(), ctx.should_export())
                };
                if let Some(director) = director {
                    if should_export {
                        director.resume_exporting().await?;
                    }
                }
                Ok(())
            })
            .await
            .map_err(Error::from)?
    }

    /// Takes a snapshot outside the regular schedule, if a snapshot director
    /// is installed.
    pub fn trigger_snapshot(&self) {
        let shared = self.shared.clone();
        self.shared.actor.run_async(move || async move {
            let director = shared.ctx.read().await.snapshot_director();
            if let Some(director) = director {
                if let Err(error) = director.force_snapshot().await {
                    warn!(partition = %shared.partition_id, %error, "forced snapshot failed");
                }
            }
        });
    }

    /// The disk monitor reports that free space fell below the threshold.
    pub fn on_disk_space_not_available(&self) {
        let shared = self.shared.clone();
        self.shared.actor.run_async(move || async move {
            let processor = {
                let mut ctx = shared.ctx.write().await;
                ctx.set_disk_space_available(false);
                ctx.stream_processor()
            };
            shared.partition_health.set_disk_space_available(false);
            if let Some(processor) = processor {
                warn!(
                    partition = %shared.partition_id,
                    "disk space usage is above the threshold, pausing the stream processor"
                );
                if let Err(error) = processor.pause_processing().await {
                    warn!(partition = %shared.partition_id, %error, "failed to pause stream processor");
                }
            }
        });
    }

    /// The disk monitor reports that free space recovered.
    pub fn on_disk_space_available(&self) {
        let shared = self.shared.clone();
        self.shared.actor.run_async(move || async move {
            let (processor, should_process) = {
                let mut ctx = shared.ctx.write().await;
                ctx.set_disk_space_available(true);
                (ctx.stream_processor(), ctx.should_process())
            };
            shared.partition_health.set_disk_space_available(true);
            if let Some(processor) = processor {
                if should_process {
                    info!(
                        partition = %shared.partition_id,
                        "disk space usage is below the threshold, resuming the stream processor"
                    );
                    if let Err(error) = processor.resume_processing().await {
                        warn!(partition = %shared.partition_id, %error, "failed to resume stream processor");
                    }
                }
            }
        });
    }

    /// Snapshot of the installed record processor, if any.
    pub async fn stream_processor(&self) -> PartitionResult<Option<Arc<dyn StreamProcessor>>> {
        let ctx = self.shared.ctx.clone();
        self.shared
            .actor
            .call_async(move || async move { ctx.read().await.stream_processor() })
            .await
            .map_err(Error::from)
    }

    /// Snapshot of the installed exporter director, if any.
    pub async fn exporter_director(&self) -> PartitionResult<Option<Arc<dyn ExporterDirector>>> {
        let ctx = self.shared.ctx.clone();
        self.shared
            .actor
            .call_async(move || async move { ctx.read().await.exporter_director() })
            .await
            .map_err(Error::from)
    }

    /// Aggregated health of the partition and its monitored components.
    pub fn health_status(&self) -> HealthStatus {
        self.shared.monitor.health_status()
    }

    /// Inbound from the health monitor: the partition left the healthy
    /// state.
    pub fn on_failure(&self) {
        let shared = self.shared.clone();
        self.shared
            .actor
            .run(move || Self::handle_monitor_failure(&shared));
    }

    /// Inbound from the health monitor: the partition recovered.
    pub fn on_recovered(&self) {
        let shared = self.shared.clone();
        self.shared
            .actor
            .run(move || Self::handle_monitor_recovery(&shared));
    }

    /// Inbound from the health monitor: the partition died.
    pub fn on_unrecoverable_failure(&self) {
        let shared = self.shared.clone();
        self.shared.actor.run_async(move || async move {
            Self::handle_unrecoverable_failure(&shared).await;
        });
    }

    /// Adds a failure listener. The listener is immediately told about the
    /// current state.
    pub fn add_failure_listener(&self, listener: Arc<dyn FailureListener>) {
        let shared = self.shared.clone();
        self.shared.actor.run(move || {
            shared
                .failure_listeners
                .lock()
                .expect("supervisor lock poisoned")
                .push(listener.clone());
            if shared.monitor.health_status().is_healthy() {
                listener.on_recovered();
            } else {
                listener.on_failure();
            }
        });
    }

    /// Removes a failure listener, matched by identity.
    pub fn remove_failure_listener(&self, listener: &Arc<dyn FailureListener>) {
        let shared = self.shared.clone();
        let listener = listener.clone();
        self.shared.actor.run(move || {
            shared
                .failure_listeners
                .lock()
                .expect("supervisor lock poisoned")
                .retain(|l| !Arc::ptr_eq(l, &listener));
        });
    }
}

/// Adapts the consensus partition into a monitorable component.
struct ConsensusHealth(Arc<dyn ConsensusPartition>);

impl HealthMonitorable for ConsensusHealth {
    fn health_status(&self) -> HealthStatus {
        self.0.health_status()
    }
}

/// Hops consensus role changes onto the supervisor's executor. Holds only a
/// weak handle so an abandoned supervisor can be dropped while consensus
/// still references its listener.
struct RoleChangeBridge {
    shared: Weak<SupervisorShared>,
}

impl RoleChangeListener for RoleChangeBridge {
    fn on_new_role(&self, role: Role, term: u64) {
        if let Some(shared) = self.shared.upgrade() {
            let actor = shared.actor.clone();
            actor.run_async(move || PartitionSupervisor::handle_role_change(shared, role, term));
        }
    }
}

/// Hops health monitor edges onto the supervisor's executor.
struct FailureBridge {
    shared: Weak<SupervisorShared>,
}

impl FailureListener for FailureBridge {
    fn on_failure(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let actor = shared.actor.clone();
            actor.run(move || PartitionSupervisor::handle_monitor_failure(&shared));
        }
    }

    fn on_recovered(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let actor = shared.actor.clone();
            actor.run(move || PartitionSupervisor::handle_monitor_recovery(&shared));
        }
    }

    fn on_unrecoverable_failure(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let actor = shared.actor.clone();
            actor.run_async(move || async move {
                PartitionSupervisor::handle_unrecoverable_failure(&shared).await;
            });
        }
    }
}
