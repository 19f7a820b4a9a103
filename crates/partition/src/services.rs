//! Service handle interfaces
//!
//! The services a role installs (record processor, exporters, snapshots,
//! key-value store, messaging) live outside this crate. Steps obtain them
//! through a [`ServiceFactory`] and the supervisor controls them through the
//! narrow handles below. All methods return futures; a service that must
//! block offloads to its own worker pool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PartitionContext;
use crate::error::PartitionResult;

/// Execution mode for the record processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Process new records and replicate results (leaders).
    Processing,
    /// Replay the replicated log without producing new records (followers).
    Replay,
}

/// The replicated record log of this partition.
#[async_trait]
pub trait LogStream: Send + Sync {
    /// Releases the log stream.
    async fn close(&self) -> PartitionResult<()>;
}

/// Embedded key-value store backing the record processor's state.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Flushes and releases the store.
    async fn close(&self) -> PartitionResult<()>;
}

/// Deterministic record processor bound to the log stream.
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    /// Stops consuming records until resumed.
    async fn pause_processing(&self) -> PartitionResult<()>;

    /// Resumes consuming records.
    async fn resume_processing(&self) -> PartitionResult<()>;

    /// Stops the processor and releases its resources.
    async fn close(&self) -> PartitionResult<()>;
}

/// Coordinates snapshotting of the partition state.
#[async_trait]
pub trait SnapshotDirector: Send + Sync {
    /// Takes a snapshot outside the regular schedule.
    async fn force_snapshot(&self) -> PartitionResult<()>;

    /// Stops the director.
    async fn close(&self) -> PartitionResult<()>;
}

/// Streams processed records out to configured exporters.
#[async_trait]
pub trait ExporterDirector: Send + Sync {
    /// Stops exporting until resumed.
    async fn pause_exporting(&self) -> PartitionResult<()>;

    /// Resumes exporting.
    async fn resume_exporting(&self) -> PartitionResult<()>;

    /// Stops the director and its exporters.
    async fn close(&self) -> PartitionResult<()>;
}

/// Subscription/messaging endpoint of the partition.
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Stops the messaging service.
    async fn close(&self) -> PartitionResult<()>;
}

/// Constructs service instances for this partition.
///
/// Implementations receive the context read-only; they must not attempt to
/// lock the shared context themselves.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Opens the replicated log stream.
    async fn open_log_stream(&self, ctx: &PartitionContext) -> PartitionResult<Arc<dyn LogStream>>;

    /// Opens the key-value store.
    async fn open_kv_store(&self, ctx: &PartitionContext) -> PartitionResult<Arc<dyn KvStore>>;

    /// Opens the record processor in the given mode.
    async fn open_stream_processor(
        &self,
        ctx: &PartitionContext,
        mode: ProcessingMode,
    ) -> PartitionResult<Arc<dyn StreamProcessor>>;

    /// Opens the snapshot director.
    async fn open_snapshot_director(
        &self,
        ctx: &PartitionContext,
    ) -> PartitionResult<Arc<dyn SnapshotDirector>>;

    /// Opens the exporter director.
    async fn open_exporter_director(
        &self,
        ctx: &PartitionContext,
    ) -> PartitionResult<Arc<dyn ExporterDirector>>;

    /// Opens the messaging service.
    async fn open_messaging(
        &self,
        ctx: &PartitionContext,
    ) -> PartitionResult<Arc<dyn MessagingService>>;
}
