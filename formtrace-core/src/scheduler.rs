//! Batch scheduler
//!
//! Owns the pending queue and decides when a batch goes out:
//! - Batch size reached on [`BatchScheduler::enqueue`]
//! - Flush interval expired (repeating timer armed by [`BatchScheduler::start`])
//! - Explicit [`flush`](BatchScheduler::flush) / [`flush_and_wait`](BatchScheduler::flush_and_wait)
//!
//! ## Delivery guarantees
//!
//! At most one normal send is in flight at any time. A failed batch is
//! persisted to the durable store and put back at the head of the queue in
//! its original order, so the next cycle retries it before anything newer.
//! Nothing here is exactly-once: a batch that fails, is persisted, and later
//! succeeds on retry is still in the store and is resent by the next start.
//!
//! The queue lock is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AgentConfig;
use crate::delivery::DeliveryChannel;
use crate::error::{Error, Result};
use crate::store::DurableStore;
use crate::types::FormEvent;

/// Scheduler thresholds
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for SchedulerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
        }
    }
}

/// Result of one normal send cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Queue was empty, nothing sent
    Idle,
    /// Another send was in flight, nothing sent
    Busy,
    /// This many events were delivered
    Delivered(usize),
    /// Delivery failed; this many events were persisted and requeued
    Requeued(usize),
}

/// Result of an emergency flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyOutcome {
    /// Nothing was queued, no network activity
    Empty,
    /// The beacon accepted this many events
    Sent(usize),
    /// The beacon rejected; this many events went to the durable store
    Persisted(usize),
    /// The beacon rejected and storage is unavailable
    Lost(usize),
}

struct QueueState {
    pending: VecDeque<FormEvent>,
    in_flight: bool,
}

struct Inner {
    config: SchedulerConfig,
    channel: DeliveryChannel,
    store: DurableStore,
    runtime: Handle,
    state: Mutex<QueueState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the batch scheduler; clones share one queue
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

impl BatchScheduler {
    /// Restore persisted events, clear the store, and arm the flush timer
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        channel: DeliveryChannel,
        store: DurableStore,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("batch scheduler needs a tokio runtime: {}", e)))?;

        let restored = store.retrieve();
        store.clear();
        if !restored.is_empty() {
            tracing::debug!(count = restored.len(), "Restored persisted events");
        }

        let inner = Arc::new(Inner {
            config,
            channel,
            store,
            runtime,
            state: Mutex::new(QueueState {
                pending: restored.into(),
                in_flight: false,
            }),
            timer: Mutex::new(None),
        });

        let timer = inner
            .runtime
            .spawn(run_timer(Arc::downgrade(&inner), config.flush_interval));
        *inner.timer.lock().unwrap() = Some(timer);

        Ok(Self { inner })
    }

    /// Append an event; sends immediately once the batch size is reached
    pub fn enqueue(&self, event: FormEvent) {
        let due = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.push_back(event);
            state.pending.len() >= self.inner.config.batch_size
        };
        if due {
            self.flush();
        }
    }

    /// Start a send cycle in the background
    pub fn flush(&self) {
        Inner::spawn_cycle(&self.inner);
    }

    /// Run a send cycle and report how it ended
    pub async fn flush_and_wait(&self) -> CycleOutcome {
        self.inner.send_cycle().await
    }

    /// Hand the whole queue to the emergency channel
    ///
    /// On rejection the events go to the durable store. The queue is empty
    /// afterwards either way, so a repeated call sends nothing.
    pub fn emergency_flush(&self) -> EmergencyOutcome {
        let events: Vec<FormEvent> = self.inner.state.lock().unwrap().pending.drain(..).collect();
        if events.is_empty() {
            return EmergencyOutcome::Empty;
        }

        let count = events.len();
        if self.inner.channel.deliver_emergency(&events) {
            tracing::debug!(count, "Emergency batch accepted");
            return EmergencyOutcome::Sent(count);
        }

        if self.inner.store.store(&events) {
            tracing::debug!(count, "Emergency batch rejected, persisted");
            EmergencyOutcome::Persisted(count)
        } else {
            tracing::debug!(count, "Emergency batch rejected and could not be persisted");
            EmergencyOutcome::Lost(count)
        }
    }

    /// Cancel the timer and make one best-effort delivery of what is left
    pub fn teardown(&self) -> EmergencyOutcome {
        self.cancel_timer();
        self.emergency_flush()
    }

    /// Cancel the timer and leave the durable store holding exactly the
    /// events still queued
    ///
    /// For hosts without background delivery (a process about to exit).
    /// Returns the number of events persisted; 0 if the write failed.
    pub fn suspend(&self) -> usize {
        self.cancel_timer();
        let events: Vec<FormEvent> = self.inner.state.lock().unwrap().pending.drain(..).collect();
        self.inner.store.clear();
        if !self.inner.store.store(&events) {
            tracing::warn!(count = events.len(), "Suspended but queued events were lost");
            return 0;
        }
        tracing::debug!(count = events.len(), "Suspended with events persisted");
        events.len()
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().unwrap().take() {
            timer.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Snapshot of the queue, head first
    pub fn pending_events(&self) -> Vec<FormEvent> {
        self.inner.state.lock().unwrap().pending.iter().cloned().collect()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.state.lock().unwrap().in_flight
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    pub fn store(&self) -> &DurableStore {
        &self.inner.store
    }
}

impl Inner {
    fn spawn_cycle(this: &Arc<Self>) {
        let inner = Arc::clone(this);
        this.runtime.spawn(async move {
            inner.send_cycle().await;
        });
    }

    fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().pending.is_empty()
    }

    async fn send_cycle(&self) -> CycleOutcome {
        let batch: Vec<FormEvent> = {
            let mut state = self.state.lock().unwrap();
            if state.in_flight {
                return CycleOutcome::Busy;
            }
            if state.pending.is_empty() {
                return CycleOutcome::Idle;
            }
            let take = state.pending.len().min(self.config.batch_size);
            state.in_flight = true;
            state.pending.drain(..take).collect()
        };

        let mut flight = InFlight {
            inner: self,
            batch: Some(batch),
        };
        let events = flight.batch.as_deref().unwrap_or_default();
        let result = self.channel.deliver(events).await;
        let batch = flight.batch.take().unwrap_or_default();

        match result {
            Ok(()) => {
                tracing::debug!(count = batch.len(), "Batch delivered");
                CycleOutcome::Delivered(batch.len())
            }
            Err(e) => {
                tracing::debug!(error = %e, count = batch.len(), "Batch delivery failed, requeueing");
                let count = batch.len();
                self.store.store(&batch);
                self.requeue_front(batch);
                CycleOutcome::Requeued(count)
            }
        }
    }

    /// Put events back at the queue head, keeping their order
    fn requeue_front(&self, batch: Vec<FormEvent>) {
        let mut state = self.state.lock().unwrap();
        for event in batch.into_iter().rev() {
            state.pending.push_front(event);
        }
    }
}

/// Clears the in-flight flag however the send cycle ends
///
/// If the cycle is dropped mid-request the batch is still owned here; it is
/// persisted and requeued rather than lost.
struct InFlight<'a> {
    inner: &'a Inner,
    batch: Option<Vec<FormEvent>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            tracing::debug!(count = batch.len(), "Send cycle cancelled, requeueing");
            self.inner.store.store(&batch);
            self.inner.requeue_front(batch);
        }
        self.inner.state.lock().unwrap().in_flight = false;
    }
}

async fn run_timer(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.has_pending() {
            Inner::spawn_cycle(&inner);
        }
    }
}
