//! Partition install steps
//!
//! Each step installs one service through the context's factory on open and
//! removes it again on close. Closing a step whose handle was never
//! installed is a no-op, so a teardown may safely cover a step that failed
//! halfway through opening.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SharedContext;
use crate::error::PartitionResult;
use crate::services::{ProcessingMode, ServiceFactory};
use crate::startup::StartupStep;

/// A step operating on the shared partition context.
pub type PartitionStep = Arc<dyn StartupStep<SharedContext>>;

async fn factory_of(ctx: &SharedContext) -> PartitionResult<Arc<dyn ServiceFactory>> {
    ctx.read().await.service_factory()
}

/// Installs the replicated log stream.
pub struct LogStreamStep;

#[async_trait]
impl StartupStep<SharedContext> for LogStreamStep {
    fn name(&self) -> &str {
        "log-stream"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let log_stream = {
            let guard = ctx.read().await;
            factory.open_log_stream(&guard).await?
        };
        ctx.write().await.set_log_stream(log_stream);
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let log_stream = ctx.write().await.take_log_stream();
        if let Some(log_stream) = log_stream {
            log_stream.close().await?;
        }
        Ok(())
    }
}

/// Installs the key-value store backing the record processor's state.
pub struct KvStoreStep;

#[async_trait]
impl StartupStep<SharedContext> for KvStoreStep {
    fn name(&self) -> &str {
        "kv-store"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let kv_store = {
            let guard = ctx.read().await;
            factory.open_kv_store(&guard).await?
        };
        ctx.write().await.set_kv_store(kv_store);
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let kv_store = ctx.write().await.take_kv_store();
        if let Some(kv_store) = kv_store {
            kv_store.close().await?;
        }
        Ok(())
    }
}

/// Installs the record processor in a role-specific mode.
pub struct StreamProcessorStep {
    mode: ProcessingMode,
}

impl StreamProcessorStep {
    /// Creates the step for the given processing mode.
    pub fn new(mode: ProcessingMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl StartupStep<SharedContext> for StreamProcessorStep {
    fn name(&self) -> &str {
        "stream-processor"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let processor = {
            let guard = ctx.read().await;
            factory.open_stream_processor(&guard, self.mode).await?
        };
        // Respect operator pauses and the disk gate from the moment the
        // processor exists.
        let should_process = {
            let mut guard = ctx.write().await;
            guard.set_stream_processor(processor.clone());
            guard.should_process()
        };
        if !should_process {
            processor.pause_processing().await?;
        }
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let processor = ctx.write().await.take_stream_processor();
        if let Some(processor) = processor {
            processor.close().await?;
        }
        Ok(())
    }
}

/// Installs the snapshot director.
pub struct SnapshotDirectorStep;

#[async_trait]
impl StartupStep<SharedContext> for SnapshotDirectorStep {
    fn name(&self) -> &str {
        "snapshot-director"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let director = {
            let guard = ctx.read().await;
            factory.open_snapshot_director(&guard).await?
        };
        ctx.write().await.set_snapshot_director(director);
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let director = ctx.write().await.take_snapshot_director();
        if let Some(director) = director {
            director.close().await?;
        }
        Ok(())
    }
}

/// Installs the exporter director.
pub struct ExporterDirectorStep;

#[async_trait]
impl StartupStep<SharedContext> for ExporterDirectorStep {
    fn name(&self) -> &str {
        "exporter-director"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let director = {
            let guard = ctx.read().await;
            factory.open_exporter_director(&guard).await?
        };
        let should_export = {
            let mut guard = ctx.write().await;
            guard.set_exporter_director(director.clone());
            guard.should_export()
        };
        if !should_export {
            director.pause_exporting().await?;
        }
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let director = ctx.write().await.take_exporter_director();
        if let Some(director) = director {
            director.close().await?;
        }
        Ok(())
    }
}

/// Installs the messaging service.
pub struct MessagingStep;

#[async_trait]
impl StartupStep<SharedContext> for MessagingStep {
    fn name(&self) -> &str {
        "messaging"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let factory = factory_of(ctx).await?;
        let messaging = {
            let guard = ctx.read().await;
            factory.open_messaging(&guard).await?
        };
        ctx.write().await.set_messaging(messaging);
        Ok(())
    }

    async fn close(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let messaging = ctx.write().await.take_messaging();
        if let Some(messaging) = messaging {
            messaging.close().await?;
        }
        Ok(())
    }
}

/// Bootstrap step loading the persisted settings into the context.
pub struct SettingsStep;

#[async_trait]
impl StartupStep<SharedContext> for SettingsStep {
    fn name(&self) -> &str {
        "settings"
    }

    async fn open(&self, ctx: &mut SharedContext) -> PartitionResult<()> {
        let store = ctx.read().await.settings_store();
        let settings = store.load().await?;
        ctx.write().await.set_settings(settings);
        Ok(())
    }

    async fn close(&self, _ctx: &mut SharedContext) -> PartitionResult<()> {
        Ok(())
    }
}

/// The steps a leader installs, in open order.
pub fn leader_steps() -> Vec<PartitionStep> {
    vec![
        Arc::new(LogStreamStep),
        Arc::new(KvStoreStep),
        Arc::new(StreamProcessorStep::new(ProcessingMode::Processing)),
        Arc::new(SnapshotDirectorStep),
        Arc::new(ExporterDirectorStep),
        Arc::new(MessagingStep),
    ]
}

/// The reduced step set a follower installs, in open order.
pub fn follower_steps() -> Vec<PartitionStep> {
    vec![
        Arc::new(LogStreamStep),
        Arc::new(KvStoreStep),
        Arc::new(StreamProcessorStep::new(ProcessingMode::Replay)),
        Arc::new(SnapshotDirectorStep),
    ]
}

/// The role-independent bootstrap steps, in open order.
pub fn bootstrap_steps() -> Vec<PartitionStep> {
    vec![Arc::new(SettingsStep)]
}
