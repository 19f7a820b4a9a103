//! Partition role transitions
//!
//! A transition from role A to role B tears A's steps down in reverse order
//! and then opens B's steps in configured order. Each installed role is
//! owned by one [`StartupProcess`]; the engine keeps the current process
//! around so a later transition can tear it down, including the case where
//! the install itself failed partway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::PartitionConfig;
use crate::consensus::Role;
use crate::context::SharedContext;
use crate::error::PartitionResult;
use crate::startup::StartupProcess;
use crate::steps::{self, PartitionStep};

/// Drives the install/teardown plan for role changes.
#[async_trait]
pub trait PartitionTransition: Send + Sync {
    /// Installs leader services for `term`.
    async fn to_leader(&self, term: u64) -> PartitionResult<()>;

    /// Installs follower services for `term`.
    async fn to_follower(&self, term: u64) -> PartitionResult<()>;

    /// Tears all role services down.
    async fn to_inactive(&self) -> PartitionResult<()>;
}

/// Default transition engine over the configured role step sets.
pub struct TransitionEngine {
    ctx: SharedContext,
    leader_steps: Vec<PartitionStep>,
    follower_steps: Vec<PartitionStep>,
    step_open_timeout: Option<Duration>,
    current: Mutex<Option<StartupProcess<SharedContext>>>,
}

impl TransitionEngine {
    /// Creates an engine with the default role step sets.
    pub fn new(ctx: SharedContext, config: &PartitionConfig) -> Self {
        Self::with_steps(
            ctx,
            steps::leader_steps(),
            steps::follower_steps(),
            config.step_open_timeout,
        )
    }

    /// Creates an engine with custom role step sets.
    pub fn with_steps(
        ctx: SharedContext,
        leader_steps: Vec<PartitionStep>,
        follower_steps: Vec<PartitionStep>,
        step_open_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            leader_steps,
            follower_steps,
            step_open_timeout,
            current: Mutex::new(None),
        }
    }

    async fn transition_to(
        &self,
        role: Role,
        term: u64,
        steps: Vec<PartitionStep>,
    ) -> PartitionResult<()> {
        let partition_id = {
            let mut ctx = self.ctx.write().await;
            ctx.stamp_role(role, term);
            ctx.partition_id()
        };
        info!(partition = %partition_id, %role, term, "transitioning partition role");

        let mut current = self.current.lock().await;
        if let Some(process) = current.take() {
            // A dirty teardown aborts the transition; nothing is installed
            // on top of leftover services.
            process.shutdown(self.ctx.clone()).await?;
        }

        if steps.is_empty() {
            return Ok(());
        }

        let process = StartupProcess::new(format!("{role}-transition"), steps)
            .with_step_timeout(self.step_open_timeout);
        let process = current.insert(process);
        process.startup(self.ctx.clone()).await?;
        Ok(())
    }
}

#[async_trait]
impl PartitionTransition for TransitionEngine {
    async fn to_leader(&self, term: u64) -> PartitionResult<()> {
        self.transition_to(Role::Leader, term, self.leader_steps.clone())
            .await
    }

    async fn to_follower(&self, term: u64) -> PartitionResult<()> {
        self.transition_to(Role::Follower, term, self.follower_steps.clone())
            .await
    }

    async fn to_inactive(&self) -> PartitionResult<()> {
        let term = self.ctx.read().await.current_term();
        self.transition_to(Role::Inactive, term, Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::context::PartitionContext;
    use crate::error::Error;
    use crate::services::{
        ExporterDirector, KvStore, LogStream, MessagingService, ProcessingMode, ServiceFactory,
        SnapshotDirector, StreamProcessor,
    };
    use crate::settings::MemorySettingsStore;
    use crate::types::{NodeId, PartitionId};

    struct TestHandle {
        name: &'static str,
        events: Arc<StdMutex<Vec<String>>>,
        fail_close: bool,
    }

    impl TestHandle {
        fn record(&self, what: &str) -> PartitionResult<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("{what} {}", self.name));
            Ok(())
        }

        fn record_close(&self) -> PartitionResult<()> {
            self.record("close")?;
            if self.fail_close {
                return Err(Error::internal(format!("close {} failed", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LogStream for TestHandle {
        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[async_trait]
    impl KvStore for TestHandle {
        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[async_trait]
    impl StreamProcessor for TestHandle {
        async fn pause_processing(&self) -> PartitionResult<()> {
            self.record("pause")
        }

        async fn resume_processing(&self) -> PartitionResult<()> {
            self.record("resume")
        }

        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[async_trait]
    impl SnapshotDirector for TestHandle {
        async fn force_snapshot(&self) -> PartitionResult<()> {
            self.record("snapshot")
        }

        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[async_trait]
    impl ExporterDirector for TestHandle {
        async fn pause_exporting(&self) -> PartitionResult<()> {
            self.record("pause")
        }

        async fn resume_exporting(&self) -> PartitionResult<()> {
            self.record("resume")
        }

        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[async_trait]
    impl MessagingService for TestHandle {
        async fn close(&self) -> PartitionResult<()> {
            self.record_close()
        }
    }

    #[derive(Default)]
    struct TestFactory {
        events: Arc<StdMutex<Vec<String>>>,
        fail_open: Option<&'static str>,
        fail_close: Option<&'static str>,
    }

    impl TestFactory {
        fn handle(&self, name: &'static str) -> PartitionResult<Arc<TestHandle>> {
            if self.fail_open == Some(name) {
                return Err(Error::internal(format!("open {name} failed")));
            }
            self.events.lock().unwrap().push(format!("open {name}"));
            Ok(Arc::new(TestHandle {
                name,
                events: self.events.clone(),
                fail_close: self.fail_close == Some(name),
            }))
        }
    }

    #[async_trait]
    impl ServiceFactory for TestFactory {
        async fn open_log_stream(
            &self,
            _ctx: &PartitionContext,
        ) -> PartitionResult<Arc<dyn LogStream>> {
            Ok(self.handle("log-stream")? as Arc<dyn LogStream>)
        }

        async fn open_kv_store(
            &self,
            _ctx: &PartitionContext,
        ) -> PartitionResult<Arc<dyn KvStore>> {
            Ok(self.handle("kv-store")? as Arc<dyn KvStore>)
        }

        async fn open_stream_processor(
            &self,
            _ctx: &PartitionContext,
            _mode: ProcessingMode,
        ) -> PartitionResult<Arc<dyn StreamProcessor>> {
            Ok(self.handle("stream-processor")? as Arc<dyn StreamProcessor>)
        }

        async fn open_snapshot_director(
            &self,
            _ctx: &PartitionContext,
        ) -> PartitionResult<Arc<dyn SnapshotDirector>> {
            Ok(self.handle("snapshot-director")? as Arc<dyn SnapshotDirector>)
        }

        async fn open_exporter_director(
            &self,
            _ctx: &PartitionContext,
        ) -> PartitionResult<Arc<dyn ExporterDirector>> {
            Ok(self.handle("exporter-director")? as Arc<dyn ExporterDirector>)
        }

        async fn open_messaging(
            &self,
            _ctx: &PartitionContext,
        ) -> PartitionResult<Arc<dyn MessagingService>> {
            Ok(self.handle("messaging")? as Arc<dyn MessagingService>)
        }
    }

    fn engine_with(factory: TestFactory) -> (TransitionEngine, SharedContext, Arc<StdMutex<Vec<String>>>) {
        let events = factory.events.clone();
        let mut ctx = PartitionContext::new(
            PartitionId(1),
            NodeId(0),
            Arc::new(MemorySettingsStore::new()),
        );
        ctx.set_service_factory(Arc::new(factory));
        let ctx = ctx.shared();
        let engine = TransitionEngine::new(ctx.clone(), &PartitionConfig::default());
        (engine, ctx, events)
    }

    fn taken(events: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
        events.lock().unwrap().drain(..).collect()
    }

    #[tokio::test]
    async fn leader_transition_installs_all_services() {
        let (engine, ctx, events) = engine_with(TestFactory::default());

        engine.to_leader(1).await.unwrap();

        assert_eq!(
            taken(&events),
            vec![
                "open log-stream",
                "open kv-store",
                "open stream-processor",
                "open snapshot-director",
                "open exporter-director",
                "open messaging",
            ]
        );
        let ctx = ctx.read().await;
        assert_eq!(ctx.current_role(), Some(Role::Leader));
        assert_eq!(ctx.current_term(), 1);
        assert!(ctx.log_stream().is_some());
        assert!(ctx.kv_store().is_some());
        assert!(ctx.stream_processor().is_some());
        assert!(ctx.snapshot_director().is_some());
        assert!(ctx.exporter_director().is_some());
        assert!(ctx.messaging().is_some());
    }

    #[tokio::test]
    async fn follower_transition_tears_leader_down_first() {
        let (engine, ctx, events) = engine_with(TestFactory::default());
        engine.to_leader(1).await.unwrap();
        taken(&events);

        engine.to_follower(2).await.unwrap();

        assert_eq!(
            taken(&events),
            vec![
                "close messaging",
                "close exporter-director",
                "close snapshot-director",
                "close stream-processor",
                "close kv-store",
                "close log-stream",
                "open log-stream",
                "open kv-store",
                "open stream-processor",
                "open snapshot-director",
            ]
        );
        let ctx = ctx.read().await;
        assert_eq!(ctx.current_role(), Some(Role::Follower));
        assert!(ctx.exporter_director().is_none());
        assert!(ctx.messaging().is_none());
        assert!(ctx.stream_processor().is_some());
    }

    #[tokio::test]
    async fn inactive_transition_removes_every_handle() {
        let (engine, ctx, _events) = engine_with(TestFactory::default());
        engine.to_leader(3).await.unwrap();

        engine.to_inactive().await.unwrap();

        let ctx = ctx.read().await;
        assert_eq!(ctx.current_role(), Some(Role::Inactive));
        assert_eq!(ctx.current_term(), 3);
        assert!(ctx.log_stream().is_none());
        assert!(ctx.kv_store().is_none());
        assert!(ctx.stream_processor().is_none());
        assert!(ctx.snapshot_director().is_none());
        assert!(ctx.exporter_director().is_none());
        assert!(ctx.messaging().is_none());
    }

    #[tokio::test]
    async fn failed_install_is_torn_down_by_the_next_transition() {
        let (engine, _ctx, events) = engine_with(TestFactory {
            fail_open: Some("snapshot-director"),
            ..TestFactory::default()
        });

        assert!(engine.to_leader(1).await.is_err());
        taken(&events);

        engine.to_inactive().await.unwrap();
        assert_eq!(
            taken(&events),
            vec![
                "close stream-processor",
                "close kv-store",
                "close log-stream",
            ]
        );
    }

    #[tokio::test]
    async fn teardown_failure_aborts_the_transition() {
        let (engine, _ctx, events) = engine_with(TestFactory {
            fail_close: Some("stream-processor"),
            ..TestFactory::default()
        });
        engine.to_leader(1).await.unwrap();
        taken(&events);

        assert!(engine.to_follower(2).await.is_err());
        let events = taken(&events);
        assert!(!events.contains(&"open log-stream".to_string()));
    }
}
