//! Agent handle
//!
//! [`FormTelemetry::init`] is the single entry point: whatever bootstraps the
//! host builds one handle and keeps it. There is no global instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{AgentConfig, Config, StorageConfig};
use crate::delivery::{Beacon, DeliveryChannel, HttpTransport, Transport};
use crate::error::Result;
use crate::lifecycle::{LifecycleHooks, LifecycleSignal};
use crate::scheduler::{BatchScheduler, CycleOutcome, EmergencyOutcome, SchedulerConfig};
use crate::store::{DurableStore, SqliteStorage};
use crate::tracker::{FormTracker, TrackerConfig};
use crate::types::{FormEvent, FormSummary};

/// A running telemetry agent
pub struct FormTelemetry {
    session_id: String,
    scheduler: BatchScheduler,
    tracker: FormTracker,
    lifecycle: LifecycleHooks,
    destroyed: AtomicBool,
}

impl FormTelemetry {
    /// Build an agent from its parts
    ///
    /// Restores persisted events and arms the flush timer. Must be called
    /// from within a tokio runtime.
    pub fn init(
        config: &AgentConfig,
        store: DurableStore,
        transport: Arc<dyn Transport>,
        beacon: Arc<dyn Beacon>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let channel = DeliveryChannel::new(config.project_key()?, transport, beacon);
        let scheduler = BatchScheduler::start(SchedulerConfig::from(config), channel, store)?;
        let tracker = FormTracker::new(
            session_id.clone(),
            TrackerConfig::from(config),
            scheduler.clone(),
        )?;

        let mut lifecycle = LifecycleHooks::new(scheduler.clone());
        lifecycle.observe(Arc::new(tracker.clone()));

        tracing::info!(
            session_id = %session_id,
            endpoint = %config.endpoint,
            batch_size = scheduler.config().batch_size,
            restored = scheduler.pending_count(),
            "Form telemetry started"
        );

        Ok(Self {
            session_id,
            scheduler,
            tracker,
            lifecycle,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Build an agent with HTTP delivery and the on-disk queue
    pub fn connect(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.agent.endpoint)?;
        let beacon = transport.beacon();
        let store = open_store(&config.storage);
        Self::init(&config.agent, store, Arc::new(transport), Arc::new(beacon))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tracker(&self) -> &FormTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    /// Queue a pre-built event
    pub fn enqueue(&self, event: FormEvent) {
        self.scheduler.enqueue(event);
    }

    /// Manual event injection; unknown kinds are logged and dropped
    pub fn track(&self, form_id: &str, field_id: &str, kind: &str) {
        self.tracker.track(form_id, field_id, kind);
    }

    pub fn flush(&self) {
        self.scheduler.flush();
    }

    pub async fn flush_and_wait(&self) -> CycleOutcome {
        self.scheduler.flush_and_wait().await
    }

    /// Feed a page lifecycle signal
    pub fn signal(&self, signal: LifecycleSignal) -> Option<EmergencyOutcome> {
        self.lifecycle.handle(signal)
    }

    pub fn analytics(&self) -> Vec<FormSummary> {
        self.tracker.analytics()
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Stop tracking and make a final best-effort delivery
    ///
    /// Only the first call does anything.
    pub fn destroy(&self) -> EmergencyOutcome {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return EmergencyOutcome::Empty;
        }
        self.tracker.shutdown();
        let outcome = self.scheduler.teardown();
        tracing::info!(session_id = %self.session_id, ?outcome, "Form telemetry destroyed");
        outcome
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Open the on-disk queue, falling back to no persistence
pub fn open_store(config: &StorageConfig) -> DurableStore {
    if !config.enabled {
        return DurableStore::unavailable();
    }

    let path = config.database_path();
    match SqliteStorage::open(&path) {
        Ok(storage) => DurableStore::with_capacity(Arc::new(storage), config.max_events),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open event queue");
            DurableStore::unavailable()
        }
    }
}
