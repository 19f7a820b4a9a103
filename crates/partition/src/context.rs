//! Partition context
//!
//! The mutable state bag shared by steps, the transition engine and the
//! supervisor. The context is shared by reference but mutated only from the
//! supervisor's executor; everything else takes read snapshots.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::consensus::Role;
use crate::error::{Error, PartitionResult};
use crate::listener::PartitionListener;
use crate::services::{
    ExporterDirector, KvStore, LogStream, MessagingService, ServiceFactory, SnapshotDirector,
    StreamProcessor,
};
use crate::settings::{PartitionSettings, SettingsStore};
use crate::types::{NodeId, PartitionId};

/// The partition context behind a shared lock.
pub type SharedContext = Arc<RwLock<PartitionContext>>;

/// Mutable state of one partition replica.
pub struct PartitionContext {
    partition_id: PartitionId,
    node_id: NodeId,

    current_role: Option<Role>,
    current_term: u64,
    disk_space_available: bool,
    settings: PartitionSettings,

    settings_store: Arc<dyn SettingsStore>,
    factory: Option<Arc<dyn ServiceFactory>>,
    listeners: Vec<Arc<dyn PartitionListener>>,

    log_stream: Option<Arc<dyn LogStream>>,
    kv_store: Option<Arc<dyn KvStore>>,
    stream_processor: Option<Arc<dyn StreamProcessor>>,
    snapshot_director: Option<Arc<dyn SnapshotDirector>>,
    exporter_director: Option<Arc<dyn ExporterDirector>>,
    messaging: Option<Arc<dyn MessagingService>>,
}

impl PartitionContext {
    /// Creates an empty context for the given replica.
    pub fn new(
        partition_id: PartitionId,
        node_id: NodeId,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            partition_id,
            node_id,
            current_role: None,
            current_term: 0,
            disk_space_available: true,
            settings: PartitionSettings::default(),
            settings_store,
            factory: None,
            listeners: Vec::new(),
            log_stream: None,
            kv_store: None,
            stream_processor: None,
            snapshot_director: None,
            exporter_director: None,
            messaging: None,
        }
    }

    /// Installs the factory steps use to construct services.
    pub fn set_service_factory(&mut self, factory: Arc<dyn ServiceFactory>) {
        self.factory = Some(factory);
    }

    /// The factory steps use to construct services.
    pub fn service_factory(&self) -> PartitionResult<Arc<dyn ServiceFactory>> {
        self.factory
            .clone()
            .ok_or_else(|| Error::configuration("no service factory configured"))
    }

    /// Wraps the context for sharing.
    pub fn shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    /// Partition identifier.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Identifier of the node hosting this replica.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Role currently installed or being installed, if any.
    pub fn current_role(&self) -> Option<Role> {
        self.current_role
    }

    /// Term of the current role.
    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    /// Records the role and term a transition is installing.
    pub fn stamp_role(&mut self, role: Role, term: u64) {
        self.current_role = Some(role);
        self.current_term = term;
    }

    /// Whether the disk monitor currently allows processing.
    pub fn disk_space_available(&self) -> bool {
        self.disk_space_available
    }

    /// Updates the disk space gate.
    pub fn set_disk_space_available(&mut self, available: bool) {
        self.disk_space_available = available;
    }

    /// Cached persisted settings.
    pub fn settings(&self) -> PartitionSettings {
        self.settings
    }

    /// Replaces the cached persisted settings.
    pub fn set_settings(&mut self, settings: PartitionSettings) {
        self.settings = settings;
    }

    /// The persistence medium for [`PartitionSettings`].
    pub fn settings_store(&self) -> Arc<dyn SettingsStore> {
        self.settings_store.clone()
    }

    /// True when the record processor should run: disk space is available
    /// and no operator paused processing.
    pub fn should_process(&self) -> bool {
        self.disk_space_available && !self.settings.processing_paused
    }

    /// True when exporting should run.
    pub fn should_export(&self) -> bool {
        !self.settings.exporting_paused
    }

    /// Registers an external observer of role changes.
    pub fn add_listener(&mut self, listener: Arc<dyn PartitionListener>) {
        self.listeners.push(listener);
    }

    /// The registered partition listeners, in registration order.
    pub fn listeners(&self) -> &[Arc<dyn PartitionListener>] {
        &self.listeners
    }

    /// The installed log stream, if any.
    pub fn log_stream(&self) -> Option<Arc<dyn LogStream>> {
        self.log_stream.clone()
    }

    /// Installs the log stream handle.
    pub fn set_log_stream(&mut self, log_stream: Arc<dyn LogStream>) {
        self.log_stream = Some(log_stream);
    }

    /// Removes and returns the log stream handle.
    pub fn take_log_stream(&mut self) -> Option<Arc<dyn LogStream>> {
        self.log_stream.take()
    }

    /// The installed key-value store, if any.
    pub fn kv_store(&self) -> Option<Arc<dyn KvStore>> {
        self.kv_store.clone()
    }

    /// Installs the key-value store handle.
    pub fn set_kv_store(&mut self, kv_store: Arc<dyn KvStore>) {
        self.kv_store = Some(kv_store);
    }

    /// Removes and returns the key-value store handle.
    pub fn take_kv_store(&mut self) -> Option<Arc<dyn KvStore>> {
        self.kv_store.take()
    }

    /// The installed record processor, if any.
    pub fn stream_processor(&self) -> Option<Arc<dyn StreamProcessor>> {
        self.stream_processor.clone()
    }

    /// Installs the record processor handle.
    pub fn set_stream_processor(&mut self, processor: Arc<dyn StreamProcessor>) {
        self.stream_processor = Some(processor);
    }

    /// Removes and returns the record processor handle.
    pub fn take_stream_processor(&mut self) -> Option<Arc<dyn StreamProcessor>> {
        self.stream_processor.take()
    }

    /// The installed snapshot director, if any.
    pub fn snapshot_director(&self) -> Option<Arc<dyn SnapshotDirector>> {
        self.snapshot_director.clone()
    }

    /// Installs the snapshot director handle.
    pub fn set_snapshot_director(&mut self, director: Arc<dyn SnapshotDirector>) {
        self.snapshot_director = Some(director);
    }

    /// Removes and returns the snapshot director handle.
    pub fn take_snapshot_director(&mut self) -> Option<Arc<dyn SnapshotDirector>> {
        self.snapshot_director.take()
    }

    /// The installed exporter director, if any.
    pub fn exporter_director(&self) -> Option<Arc<dyn ExporterDirector>> {
        self.exporter_director.clone()
    }

    /// Installs the exporter director handle.
    pub fn set_exporter_director(&mut self, director: Arc<dyn ExporterDirector>) {
        self.exporter_director = Some(director);
    }

    /// Removes and returns the exporter director handle.
    pub fn take_exporter_director(&mut self) -> Option<Arc<dyn ExporterDirector>> {
        self.exporter_director.take()
    }

    /// The installed messaging service, if any.
    pub fn messaging(&self) -> Option<Arc<dyn MessagingService>> {
        self.messaging.clone()
    }

    /// Installs the messaging service handle.
    pub fn set_messaging(&mut self, messaging: Arc<dyn MessagingService>) {
        self.messaging = Some(messaging);
    }

    /// Removes and returns the messaging service handle.
    pub fn take_messaging(&mut self) -> Option<Arc<dyn MessagingService>> {
        self.messaging.take()
    }
}
