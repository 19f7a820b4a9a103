//! Ordered startup/shutdown process
//!
//! A [`StartupProcess`] executes a frozen sequence of steps. On startup the
//! steps open in the given order; the first failure aborts the remaining
//! steps. On shutdown the steps that were opened close in strict reverse
//! order; close failures never short-circuit, they are collected and
//! surfaced together.
//!
//! Callers must obey the following contract:
//!
//! - shutdown must not be called before startup,
//! - startup runs at most once,
//! - shutdown may be called more than once; the first call triggers the
//!   teardown and every call observes the same outcome,
//! - shutdown may be called while startup is still running; the in-flight
//!   step completes, the remaining steps are cancelled, the startup call
//!   fails as aborted and the teardown starts from the last opened step.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, ErrorKind, PartitionResult};

/// A unit of install/teardown work with opposite `open` and `close`
/// operations.
///
/// `open` is called at most once between `close` calls. `close` must be safe
/// to call on a partially opened step: a step whose `open` failed is still
/// closed during teardown.
#[async_trait]
pub trait StartupStep<C: Send>: Send + Sync {
    /// Name of the step, for logging.
    fn name(&self) -> &str;

    /// Installs the step, possibly populating handles in the context.
    async fn open(&self, ctx: &mut C) -> PartitionResult<()>;

    /// Tears the step down, reversing whatever `open` did.
    async fn close(&self, ctx: &mut C) -> PartitionResult<()>;
}

struct ProcessState<C> {
    startup_called: bool,
    shutdown_requested: bool,
    queue: VecDeque<Arc<dyn StartupStep<C>>>,
    started: Vec<Arc<dyn StartupStep<C>>>,
    shutdown_result: Option<Result<C, Arc<Error>>>,
}

/// Executes a number of steps in a startup/shutdown process.
///
/// The process state lives behind one async lock that is held across each
/// step execution: a shutdown requested mid-startup waits for the in-flight
/// step to settle before tearing down, and no step ever runs concurrently
/// with another.
pub struct StartupProcess<C> {
    name: String,
    steps: Vec<Arc<dyn StartupStep<C>>>,
    step_open_timeout: Option<Duration>,
    state: Mutex<ProcessState<C>>,
}

impl<C> StartupProcess<C>
where
    C: Clone + Send + 'static,
{
    /// Creates a process over a frozen step sequence.
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn StartupStep<C>>>) -> Self {
        Self {
            name: name.into(),
            steps,
            step_open_timeout: None,
            state: Mutex::new(ProcessState {
                startup_called: false,
                shutdown_requested: false,
                queue: VecDeque::new(),
                started: Vec::new(),
                shutdown_result: None,
            }),
        }
    }

    /// Bounds each step's `open` with a timeout.
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_open_timeout = timeout;
        self
    }

    /// Executes the startup logic.
    ///
    /// Fails with an invalid-state error when called a second time. When a
    /// step fails, the remaining steps are not executed and the error is
    /// returned; the steps opened so far are torn down by a later
    /// [`StartupProcess::shutdown`].
    pub async fn startup(&self, mut ctx: C) -> PartitionResult<C> {
        {
            let mut state = self.state.lock().await;
            if state.startup_called {
                return Err(Error::invalid_state(format!(
                    "startup of process '{}' must only be called once",
                    self.name
                )));
            }
            state.startup_called = true;
            state.queue = self.steps.iter().cloned().collect();
        }

        info!(process = %self.name, "starting startup process");
        let total = self.steps.len();

        loop {
            let mut state = self.state.lock().await;
            if state.shutdown_requested {
                info!(
                    process = %self.name,
                    "aborting startup process because shutdown was requested"
                );
                return Err(Error::with_context(
                    ErrorKind::Aborted,
                    format!("startup of process '{}' aborted by shutdown", self.name),
                ));
            }

            let step = match state.queue.pop_front() {
                Some(step) => step,
                None => {
                    info!(process = %self.name, "finished startup process");
                    return Ok(ctx);
                }
            };

            // Pushed before open so a later teardown covers a step that
            // failed halfway through opening.
            state.started.push(step.clone());
            let stage = state.started.len();
            info!(process = %self.name, stage, total, step = %step.name(), "startup");

            let result = self.open_step(&step, &mut ctx).await;
            drop(state);

            if let Err(error) = result {
                warn!(
                    process = %self.name,
                    step = %step.name(),
                    %error,
                    "aborting startup process due to step failure"
                );
                return Err(error);
            }
        }
    }

    async fn open_step(&self, step: &Arc<dyn StartupStep<C>>, ctx: &mut C) -> PartitionResult<()> {
        match self.step_open_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, step.open(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "step '{}' did not open within {timeout:?}",
                    step.name()
                ))),
            },
            None => step.open(ctx).await,
        }
    }

    /// Executes the shutdown logic.
    ///
    /// The first call tears the opened steps down in reverse order; every
    /// call observes the first call's outcome.
    pub async fn shutdown(&self, mut ctx: C) -> PartitionResult<C> {
        let mut state = self.state.lock().await;
        if !state.startup_called {
            return Err(Error::invalid_state(format!(
                "shutdown of process '{}' can only be called after startup",
                self.name
            )));
        }
        if let Some(result) = &state.shutdown_result {
            return match result {
                Ok(ctx) => Ok(ctx.clone()),
                Err(error) => Err(Error::shared(error)),
            };
        }
        state.shutdown_requested = true;

        info!(process = %self.name, "starting shutdown process");
        let total = self.steps.len();
        let mut errors: Vec<Error> = Vec::new();

        while let Some(step) = state.started.pop() {
            let stage = self
                .steps
                .iter()
                .position(|s| Arc::ptr_eq(s, &step))
                .map_or(0, |i| i + 1);
            info!(process = %self.name, stage, total, step = %step.name(), "shutdown");

            if let Err(error) = step.close(&mut ctx).await {
                warn!(
                    process = %self.name,
                    step = %step.name(),
                    %error,
                    "shutdown step failed, continuing"
                );
                errors.push(error);
            }
        }

        if errors.is_empty() {
            info!(process = %self.name, "finished shutdown process");
            state.shutdown_result = Some(Ok(ctx.clone()));
            Ok(ctx)
        } else {
            let error = if errors.len() == 1 {
                errors.pop().expect("one collected error")
            } else {
                Error::aggregate(
                    format!(
                        "{} steps failed during shutdown of process '{}'",
                        errors.len(),
                        self.name
                    ),
                    errors,
                )
            };
            warn!(process = %self.name, %error, "finished shutdown process with errors");
            let error = Arc::new(error);
            state.shutdown_result = Some(Err(error.clone()));
            Err(Error::shared(&error))
        }
    }
}
