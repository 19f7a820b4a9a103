//! Partition listener interface

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PartitionResult;
use crate::services::LogStream;
use crate::types::PartitionId;

/// External observer of partition role changes.
///
/// Listeners are notified after a role's services were installed. A failing
/// listener future is treated like a failed installation and triggers the
/// supervisor's recovery path.
#[async_trait]
pub trait PartitionListener: Send + Sync {
    /// The partition installed leader services for `term`.
    ///
    /// `log_stream` is the partition's log, when one was installed.
    async fn on_becoming_leader(
        &self,
        partition_id: PartitionId,
        term: u64,
        log_stream: Option<Arc<dyn LogStream>>,
    ) -> PartitionResult<()>;

    /// The partition installed follower services for `term`.
    async fn on_becoming_follower(&self, partition_id: PartitionId, term: u64)
        -> PartitionResult<()>;

    /// The partition tore its services down.
    async fn on_becoming_inactive(&self, partition_id: PartitionId, term: u64)
        -> PartitionResult<()>;
}
