//! Single-threaded cooperative executor
//!
//! An [`Actor`] serializes all work for one logical entity onto a single
//! spawned task. Jobs submitted through a handle (or any of its clones) run
//! strictly in submission order; a job may suspend by awaiting, but no two
//! jobs ever run concurrently. Components that must mutate shared state from
//! many tasks bounce onto their actor with [`Actor::run`] or [`Actor::call`]
//! instead of taking locks across await points.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

/// Errors produced by actor submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// The actor has been shut down and no longer accepts jobs.
    #[error("actor is closed")]
    Closed,
    /// The actor terminated before the submitted job produced a result.
    #[error("actor terminated before completing the call")]
    Terminated,
}

/// Result alias for actor calls.
pub type ActorResult<T> = Result<T, ActorError>;

/// Handle to a serial cooperative executor.
///
/// Cloning the handle is cheap; all clones feed the same job loop.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

struct ActorInner {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    done: watch::Receiver<bool>,
}

impl Actor {
    /// Spawns a new job loop and returns a handle to it.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let (done_tx, done_rx) = watch::channel(false);

        let loop_name = name.clone();
        tokio::spawn(async move {
            debug!(actor = %loop_name, "actor started");
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!(actor = %loop_name, "actor stopped");
            let _ = done_tx.send(true);
        });

        Self {
            inner: Arc::new(ActorInner {
                name,
                tx: Mutex::new(Some(tx)),
                done: done_rx,
            }),
        }
    }

    /// Name given to this actor at spawn time.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn submit(&self, job: Job) -> bool {
        let tx = self.inner.tx.lock().expect("actor sender lock poisoned");
        match tx.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Submits a closure for fire-and-forget execution.
    pub fn run<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.submit(Box::pin(async move { f() })) {
            warn!(actor = %self.inner.name, "job dropped, actor is closed");
        }
    }

    /// Submits a closure producing a future; the job occupies the loop until
    /// the future resolves.
    pub fn run_async<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.submit(Box::pin(async move { f().await })) {
            warn!(actor = %self.inner.name, "job dropped, actor is closed");
        }
    }

    /// Submits a closure and returns a future for its result.
    ///
    /// The job is enqueued immediately; awaiting the returned future only
    /// waits for completion.
    pub fn call<F, T>(&self, f: F) -> impl Future<Output = ActorResult<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(Box::pin(async move {
            let _ = tx.send(f());
        }));
        async move {
            if !submitted {
                return Err(ActorError::Closed);
            }
            rx.await.map_err(|_| ActorError::Terminated)
        }
    }

    /// As [`Actor::call`], for jobs that suspend.
    pub fn call_async<F, Fut, T>(&self, f: F) -> impl Future<Output = ActorResult<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(Box::pin(async move {
            let _ = tx.send(f().await);
        }));
        async move {
            if !submitted {
                return Err(ActorError::Closed);
            }
            rx.await.map_err(|_| ActorError::Terminated)
        }
    }

    /// Runs `f` on the actor every `interval`, rescheduling only after the
    /// previous execution has completed.
    ///
    /// The returned guard cancels the timer when dropped. The timer also
    /// stops on its own once the actor is closed or terminated.
    pub fn schedule_periodic<F>(&self, interval: Duration, f: F) -> PeriodicTimer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let actor = self.clone();
        let f = Arc::new(f);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let tick = f.clone();
                if actor.call(move || (tick.as_ref())()).await.is_err() {
                    break;
                }
            }
        });
        PeriodicTimer { handle }
    }

    /// Invokes `f` on the actor once every future in `futures` has resolved.
    ///
    /// `f` receives `Ok(())` when all futures succeeded, or the first error
    /// observed in submission order.
    pub fn run_on_completion<T, E, F>(&self, futures: Vec<BoxFuture<'static, Result<T, E>>>, f: F)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Result<(), E>) + Send + 'static,
    {
        let actor = self.clone();
        tokio::spawn(async move {
            let results = futures::future::join_all(futures).await;
            let outcome = results
                .into_iter()
                .find_map(|r| r.err())
                .map_or(Ok(()), Err);
            actor.run(move || f(outcome));
        });
    }

    /// Stops accepting new jobs; already queued jobs still run.
    pub fn shutdown(&self) {
        self.inner
            .tx
            .lock()
            .expect("actor sender lock poisoned")
            .take();
    }

    /// Resolves once the job loop has exited, whether by [`Actor::shutdown`]
    /// or because a job panicked.
    pub async fn closed(&self) {
        let mut done = self.inner.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                // Loop task aborted without signalling (e.g. a panic).
                break;
            }
        }
    }
}

/// Guard for a periodic job; cancels the schedule when dropped.
pub struct PeriodicTimer {
    handle: tokio::task::JoinHandle<()>,
}

impl PeriodicTimer {
    /// Cancels the schedule. An execution already submitted still runs.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let actor = Actor::spawn("ordering");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            actor.run(move || seen.lock().unwrap().push(i));
        }
        // A call flushes everything submitted before it.
        actor.call(|| ()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn call_returns_closure_value() {
        let actor = Actor::spawn("call");
        let value = actor.call(|| 40 + 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn call_async_supports_suspension() {
        let actor = Actor::spawn("suspend");
        let value = actor
            .call_async(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                "done"
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn panicking_job_terminates_pending_calls() {
        let actor = Actor::spawn("panics");
        actor.run(|| panic!("boom"));
        // Queued behind the panicking job, so it is dropped when the loop dies.
        let pending = actor.call(|| 1);

        assert_eq!(pending.await, Err(ActorError::Terminated));
        actor.closed().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs_and_drains_queue() {
        let actor = Actor::spawn("shutdown");
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        actor.run(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        actor.shutdown();
        actor.closed().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(actor.call(|| 2).await, Err(ActorError::Closed));
    }

    #[tokio::test]
    async fn periodic_job_reschedules_until_cancelled() {
        let actor = Actor::spawn("periodic");
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let timer = actor.schedule_periodic(Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);

        timer.cancel();
        let after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // At most one execution that was already submitted may still land.
        assert!(counter.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[tokio::test]
    async fn run_on_completion_reports_first_error() {
        let actor = Actor::spawn("completion");
        let (tx, rx) = oneshot::channel::<Result<(), &'static str>>();
        let tx = Mutex::new(Some(tx));

        let futures: Vec<BoxFuture<'static, Result<(), &'static str>>> = vec![
            Box::pin(async { Ok(()) }),
            Box::pin(async { Err("expected") }),
            Box::pin(async { Ok(()) }),
        ];
        actor.run_on_completion(futures, move |outcome| {
            let _ = tx.lock().unwrap().take().unwrap().send(outcome);
        });

        assert_eq!(rx.await.unwrap(), Err("expected"));
    }
}
