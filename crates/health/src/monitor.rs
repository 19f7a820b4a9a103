//! Component tree health monitor

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info};
use treadle_actor::{Actor, PeriodicTimer};

use crate::status::HealthStatus;
use crate::traits::{FailureListener, HealthMonitorable};

struct Component {
    source: Arc<dyn HealthMonitorable>,
    last: Option<HealthStatus>,
}

struct MonitorState {
    components: HashMap<String, Component>,
    listeners: Vec<Arc<dyn FailureListener>>,
    status: HealthStatus,
}

struct MonitorShared {
    name: String,
    state: RwLock<MonitorState>,
}

/// Aggregates the health of registered child components.
///
/// The monitor is bound to the owning component's [`Actor`]: registry
/// mutations, listener registration and tick polling all run as jobs on that
/// actor, so they serialize with the owner's other work. Status reads are
/// lock-protected snapshots and may come from any task.
///
/// The aggregated status is the worst status among the children; with no
/// children registered the monitor is healthy. Listeners are notified once
/// per status edge:
///
/// - healthy → unhealthy or dead: [`FailureListener::on_failure`]
/// - any → dead: [`FailureListener::on_unrecoverable_failure`]
/// - unhealthy or dead → healthy: [`FailureListener::on_recovered`]
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
    actor: Actor,
    tick: Duration,
    timer: Mutex<Option<PeriodicTimer>>,
}

impl HealthMonitor {
    /// Creates a monitor ticking every `tick` on the given actor.
    pub fn new(name: impl Into<String>, tick: Duration, actor: Actor) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                name: name.into(),
                state: RwLock::new(MonitorState {
                    components: HashMap::new(),
                    listeners: Vec::new(),
                    status: HealthStatus::Healthy,
                }),
            }),
            actor,
            tick,
            timer: Mutex::new(None),
        }
    }

    /// Registers a child under `name`, replacing any previous registration
    /// with the same name.
    pub fn register_component(&self, name: impl Into<String>, source: Arc<dyn HealthMonitorable>) {
        let shared = self.shared.clone();
        let name = name.into();
        self.actor.run(move || {
            debug!(monitor = %shared.name, component = %name, "registering component");
            shared
                .state
                .write()
                .expect("monitor state lock poisoned")
                .components
                .insert(name, Component { source, last: None });
        });
    }

    /// Removes the child registered under `name`; no-op if absent.
    pub fn remove_component(&self, name: impl Into<String>) {
        let shared = self.shared.clone();
        let name = name.into();
        self.actor.run(move || {
            debug!(monitor = %shared.name, component = %name, "removing component");
            shared
                .state
                .write()
                .expect("monitor state lock poisoned")
                .components
                .remove(&name);
        });
    }

    /// Adds a failure listener.
    ///
    /// The listener is immediately told about the current state: `on_failure`
    /// if the monitor is not healthy, `on_recovered` otherwise.
    pub fn add_failure_listener(&self, listener: Arc<dyn FailureListener>) {
        let shared = self.shared.clone();
        self.actor.run(move || {
            let status = {
                let mut state = shared.state.write().expect("monitor state lock poisoned");
                state.listeners.push(listener.clone());
                state.status
            };
            if status.is_healthy() {
                listener.on_recovered();
            } else {
                listener.on_failure();
            }
        });
    }

    /// Removes a previously added failure listener, matched by identity.
    pub fn remove_failure_listener(&self, listener: &Arc<dyn FailureListener>) {
        let shared = self.shared.clone();
        let listener = listener.clone();
        self.actor.run(move || {
            shared
                .state
                .write()
                .expect("monitor state lock poisoned")
                .listeners
                .retain(|l| !Arc::ptr_eq(l, &listener));
        });
    }

    /// Current aggregated status, as of the latest poll.
    pub fn health_status(&self) -> HealthStatus {
        self.shared
            .state
            .read()
            .expect("monitor state lock poisoned")
            .status
    }

    /// Arms the periodic poll. Idempotent; a second call replaces the timer.
    pub fn start_monitoring(&self) {
        let shared = self.shared.clone();
        let timer = self
            .actor
            .schedule_periodic(self.tick, move || Self::poll(&shared));
        *self.timer.lock().expect("monitor timer lock poisoned") = Some(timer);
    }

    /// Stops the periodic poll.
    pub fn stop(&self) {
        self.timer
            .lock()
            .expect("monitor timer lock poisoned")
            .take();
    }

    /// Submits an immediate poll, ahead of the periodic schedule.
    pub fn poll_now(&self) {
        let shared = self.shared.clone();
        self.actor.run(move || Self::poll(&shared));
    }

    fn poll(shared: &Arc<MonitorShared>) {
        let (previous, current, listeners) = {
            let mut state = shared.state.write().expect("monitor state lock poisoned");

            let mut worst = HealthStatus::Healthy;
            for (name, component) in state.components.iter_mut() {
                let status = component.source.health_status();
                if component.last != Some(status) {
                    debug!(
                        monitor = %shared.name,
                        component = %name,
                        status = %status,
                        "component health changed"
                    );
                    component.last = Some(status);
                }
                worst = worst.worst(status);
            }

            let previous = state.status;
            state.status = worst;
            if previous == worst {
                return;
            }
            (previous, worst, state.listeners.clone())
        };

        info!(
            monitor = %shared.name,
            from = %previous,
            to = %current,
            "health status changed"
        );

        if previous.is_healthy() && !current.is_healthy() {
            for listener in &listeners {
                listener.on_failure();
            }
        }
        if !previous.is_healthy() && current.is_healthy() {
            for listener in &listeners {
                listener.on_recovered();
            }
        }
        if current.is_dead() {
            for listener in &listeners {
                listener.on_unrecoverable_failure();
            }
        }
    }
}
