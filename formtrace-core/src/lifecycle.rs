//! Lifecycle hooks
//!
//! Bridges host visibility/unload signals into the scheduler's emergency
//! flush. Observers (the form tracker's abandonment sweep) run first so the
//! events they produce ride along in the same payload.

use std::sync::Arc;

use crate::scheduler::{BatchScheduler, EmergencyOutcome};

/// Page lifecycle signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Visibility changed to hidden
    VisibilityHidden,
    /// Visibility changed to visible; ignored
    VisibilityVisible,
    PageHide,
    BeforeUnload,
}

impl LifecycleSignal {
    /// Whether the signal means the user may be leaving
    pub fn is_departure(&self) -> bool {
        !matches!(self, LifecycleSignal::VisibilityVisible)
    }
}

/// Notified on each departure signal, before the emergency flush
pub trait DepartureObserver: Send + Sync {
    fn on_departure(&self);
}

/// Routes lifecycle signals to observers and the emergency flush
pub struct LifecycleHooks {
    scheduler: BatchScheduler,
    observers: Vec<Arc<dyn DepartureObserver>>,
}

impl LifecycleHooks {
    pub fn new(scheduler: BatchScheduler) -> Self {
        Self {
            scheduler,
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: Arc<dyn DepartureObserver>) {
        self.observers.push(observer);
    }

    /// Handle one signal
    ///
    /// Returns `None` for signals that are not departures. A second departure
    /// right after a successful one finds an empty queue and sends nothing.
    pub fn handle(&self, signal: LifecycleSignal) -> Option<EmergencyOutcome> {
        if !signal.is_departure() {
            return None;
        }

        for observer in &self.observers {
            observer.on_departure();
        }

        let outcome = self.scheduler.emergency_flush();
        tracing::debug!(?signal, ?outcome, "Lifecycle flush");
        Some(outcome)
    }
}
