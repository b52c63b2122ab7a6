//! Form tracker
//!
//! Turns form interaction notifications from the host into [`FormEvent`]s
//! and feeds them to the batch scheduler. The host owns element wiring; the
//! tracker only sees identifiers plus a [`FieldProbe`] per field.
//!
//! Blur handling is debounced: a blur schedules a deferred task, and a
//! re-focus of the same field inside the window cancels it, so tabbing
//! away and straight back counts as one continuous interaction.

mod identify;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use identify::{
    field_identifier, form_identifier, FieldDescriptor, FieldHandle, FieldProbe, FormDescriptor,
};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::lifecycle::DepartureObserver;
use crate::scheduler::BatchScheduler;
use crate::types::{EventKind, EventMetadata, FormEvent, FormSummary, FORM_LEVEL_FIELD};

/// Tracker options
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub track_changes: bool,
    pub blur_debounce: Duration,
}

impl From<&AgentConfig> for TrackerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            track_changes: config.track_changes,
            blur_debounce: config.blur_debounce(),
        }
    }
}

struct FieldState {
    id: String,
    /// 1-based position at registration
    position: usize,
    probe: Arc<dyn FieldProbe>,
    focused_at: Option<Instant>,
    time_spent: Duration,
    interactions: u32,
    errors: u32,
    completed: bool,
    pending_blur: Option<JoinHandle<()>>,
    /// Bumped on every schedule/cancel so a stale blur task can tell
    blur_seq: u64,
}

impl FieldState {
    fn cancel_blur(&mut self) -> bool {
        self.blur_seq += 1;
        match self.pending_blur.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct FormState {
    fields: Vec<FieldState>,
    started_at: Option<Instant>,
    last_focused_field: Option<String>,
    interactions: u32,
    submitted: bool,
    abandon_reported: bool,
}

impl FormState {
    fn field_index(&self, field_id: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.id == field_id)
    }

    fn completed_fields(&self) -> usize {
        self.fields.iter().filter(|f| f.completed).count()
    }

    fn elapsed_ms(&self, now: Instant) -> Option<u64> {
        self.started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
    }
}

struct TrackerInner {
    session_id: String,
    config: TrackerConfig,
    scheduler: BatchScheduler,
    runtime: Handle,
    forms: Mutex<BTreeMap<String, FormState>>,
}

/// Handle to the form tracker; clones share state
#[derive(Clone)]
pub struct FormTracker {
    inner: Arc<TrackerInner>,
}

impl FormTracker {
    /// Must be called from within a tokio runtime (blur debouncing spawns tasks)
    pub fn new(
        session_id: impl Into<String>,
        config: TrackerConfig,
        scheduler: BatchScheduler,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("form tracker needs a tokio runtime: {}", e)))?;

        Ok(Self {
            inner: Arc::new(TrackerInner {
                session_id: session_id.into(),
                config,
                scheduler,
                runtime,
                forms: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Start tracking a form; returns its identifier
    ///
    /// Registering an already tracked identifier changes nothing.
    pub fn register_form(&self, form: FormDescriptor) -> String {
        let form_id = form_identifier(&form);
        let mut forms = self.inner.forms.lock().unwrap();
        if forms.contains_key(&form_id) {
            return form_id;
        }

        let fields = form
            .fields
            .iter()
            .filter(|f| f.is_trackable())
            .enumerate()
            .map(|(index, field)| FieldState {
                id: field_identifier(field, index),
                position: index + 1,
                probe: Arc::clone(&field.probe),
                focused_at: None,
                time_spent: Duration::ZERO,
                interactions: 0,
                errors: 0,
                completed: false,
                pending_blur: None,
                blur_seq: 0,
            })
            .collect::<Vec<_>>();

        tracing::debug!(form_id = %form_id, fields = fields.len(), "Tracking form");
        forms.insert(
            form_id.clone(),
            FormState {
                fields,
                ..Default::default()
            },
        );
        form_id
    }

    pub fn field_focus(&self, form_id: &str, field_id: &str) {
        let now = Instant::now();
        let session_id = &self.inner.session_id;

        let event = self.inner.with_field(form_id, field_id, |form, index| {
            let total_fields = form.fields.len();
            let field = &mut form.fields[index];
            if field.cancel_blur() {
                return None;
            }

            field.focused_at = Some(now);
            field.interactions += 1;
            let position = field.position;
            let field_id = field.id.clone();

            form.interactions += 1;
            form.started_at.get_or_insert(now);
            form.last_focused_field = Some(field_id.clone());
            // a new visit may be abandoned again
            form.abandon_reported = false;

            Some(
                FormEvent::new(session_id, form_id, field_id, EventKind::Focus).with_metadata(
                    EventMetadata {
                        interaction_count: Some(form.interactions),
                        field_position: Some(position),
                        total_fields: Some(total_fields),
                        ..Default::default()
                    },
                ),
            )
        });

        if let Some(event) = event.flatten() {
            self.inner.scheduler.enqueue(event);
        }
    }

    /// Schedule a debounced blur; any previously pending blur is cancelled
    pub fn field_blur(&self, form_id: &str, field_id: &str) {
        let blurred_at = Instant::now();
        let weak = Arc::downgrade(&self.inner);
        let debounce = self.inner.config.blur_debounce;

        self.inner.with_field(form_id, field_id, |form, index| {
            let field = &mut form.fields[index];
            if field.focused_at.is_none() {
                return;
            }
            field.cancel_blur();
            let seq = field.blur_seq;
            let form_id = form_id.to_string();
            let field_id = field_id.to_string();

            field.pending_blur = Some(self.inner.runtime.spawn(async move {
                tokio::time::sleep(debounce).await;
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.complete_blur(&form_id, &field_id, seq, blurred_at);
                }
            }));
        });
    }

    pub fn field_change(&self, form_id: &str, field_id: &str) {
        let track_changes = self.inner.config.track_changes;
        let session_id = &self.inner.session_id;

        let event = self.inner.with_field(form_id, field_id, |form, index| {
            let field = &mut form.fields[index];
            field.completed = field.probe.has_value();
            if !track_changes {
                return None;
            }
            Some(
                FormEvent::new(session_id, form_id, field.id.clone(), EventKind::Change)
                    .with_metadata(EventMetadata {
                        completed: Some(field.completed),
                        field_position: Some(field.position),
                        ..Default::default()
                    }),
            )
        });

        if let Some(event) = event.flatten() {
            self.inner.scheduler.enqueue(event);
        }
    }

    /// Record a validation error on a field
    pub fn field_invalid(&self, form_id: &str, field_id: &str) {
        let session_id = &self.inner.session_id;

        let event = self.inner.with_field(form_id, field_id, |form, index| {
            let field = &mut form.fields[index];
            field.errors += 1;
            FormEvent::new(session_id, form_id, field.id.clone(), EventKind::Error).with_metadata(
                EventMetadata {
                    error_count: Some(field.errors),
                    field_position: Some(field.position),
                    ..Default::default()
                },
            )
        });

        if let Some(event) = event {
            self.inner.scheduler.enqueue(event);
        }
    }

    /// Record a submission and request an immediate flush
    pub fn form_submit(&self, form_id: &str) {
        let now = Instant::now();
        let event = {
            let mut forms = self.inner.forms.lock().unwrap();
            let Some(form) = forms.get_mut(form_id) else {
                tracing::debug!(form_id, "Submit for untracked form ignored");
                return;
            };

            form.submitted = true;
            for field in &mut form.fields {
                field.completed = field.probe.has_value();
            }

            let mut event = FormEvent::new(
                &self.inner.session_id,
                form_id,
                FORM_LEVEL_FIELD,
                EventKind::Submit,
            )
            .with_metadata(EventMetadata {
                interaction_count: Some(form.interactions),
                total_fields: Some(form.fields.len()),
                completed_fields: Some(form.completed_fields()),
                completed: Some(true),
                ..Default::default()
            });
            if let Some(elapsed) = form.elapsed_ms(now) {
                event = event.with_duration(elapsed);
            }
            event
        };

        self.inner.scheduler.enqueue(event);
        self.inner.scheduler.flush();
    }

    /// Emit one `abandon` event per focused, unsubmitted, unreported form
    ///
    /// Forms that never received focus are skipped even if they recorded
    /// validation errors.
    pub fn detect_abandonment(&self) -> usize {
        let now = Instant::now();
        let events: Vec<FormEvent> = {
            let mut forms = self.inner.forms.lock().unwrap();
            forms
                .iter_mut()
                .filter(|(_, form)| !form.submitted && !form.abandon_reported)
                .filter_map(|(form_id, form)| {
                    let field_id = form.last_focused_field.clone()?;
                    form.abandon_reported = true;

                    let mut event = FormEvent::new(
                        &self.inner.session_id,
                        form_id,
                        field_id,
                        EventKind::Abandon,
                    )
                    .with_metadata(EventMetadata {
                        interaction_count: Some(form.interactions),
                        total_fields: Some(form.fields.len()),
                        completed_fields: Some(form.completed_fields()),
                        completed: Some(false),
                        ..Default::default()
                    });
                    if let Some(elapsed) = form.elapsed_ms(now) {
                        event = event.with_duration(elapsed);
                    }
                    Some(event)
                })
                .collect()
        };

        let count = events.len();
        for event in events {
            self.inner.scheduler.enqueue(event);
        }
        count
    }

    /// Manual event injection; unknown kinds are logged and dropped
    pub fn track(&self, form_id: &str, field_id: &str, kind: &str) {
        match kind.parse::<EventKind>() {
            Ok(kind) => {
                let event = FormEvent::new(&self.inner.session_id, form_id, field_id, kind);
                self.inner.scheduler.enqueue(event);
            }
            Err(e) => tracing::warn!(form_id, field_id, error = %e, "Dropping manual event"),
        }
    }

    /// Per-form counts from in-memory state
    pub fn analytics(&self) -> Vec<FormSummary> {
        let forms = self.inner.forms.lock().unwrap();
        forms
            .iter()
            .map(|(form_id, form)| FormSummary {
                form_id: form_id.clone(),
                fields_total: form.fields.len(),
                fields_completed: form.completed_fields(),
                interactions: form.interactions,
                time_spent_ms: form
                    .fields
                    .iter()
                    .map(|f| f.time_spent.as_millis() as u64)
                    .sum(),
                submitted: form.submitted,
            })
            .collect()
    }

    /// Cancel every pending blur task
    pub fn shutdown(&self) {
        let mut forms = self.inner.forms.lock().unwrap();
        for field in forms.values_mut().flat_map(|form| form.fields.iter_mut()) {
            field.cancel_blur();
        }
    }
}

impl DepartureObserver for FormTracker {
    fn on_departure(&self) {
        self.detect_abandonment();
    }
}

impl TrackerInner {
    /// Run `f` against a tracked field; `None` if form or field is unknown
    fn with_field<R>(
        &self,
        form_id: &str,
        field_id: &str,
        f: impl FnOnce(&mut FormState, usize) -> R,
    ) -> Option<R> {
        let mut forms = self.forms.lock().unwrap();
        let form = forms.get_mut(form_id)?;
        let Some(index) = form.field_index(field_id) else {
            tracing::debug!(form_id, field_id, "Event for untracked field ignored");
            return None;
        };
        Some(f(form, index))
    }

    fn complete_blur(&self, form_id: &str, field_id: &str, seq: u64, blurred_at: Instant) {
        let event = self.with_field(form_id, field_id, |form, index| {
            let field = &mut form.fields[index];
            if field.blur_seq != seq {
                return None;
            }
            field.pending_blur = None;

            if !field.probe.is_connected() {
                tracing::debug!(form_id, field_id, "Field removed, dropping state");
                form.fields.remove(index);
                return None;
            }

            let spent = field
                .focused_at
                .take()
                .map(|focused| blurred_at.saturating_duration_since(focused))
                .unwrap_or_default();
            field.time_spent += spent;
            field.completed = field.probe.has_value();

            Some(
                FormEvent::new(&self.session_id, form_id, field.id.clone(), EventKind::Blur)
                    .with_duration(spent.as_millis() as u64)
                    .with_metadata(EventMetadata {
                        completed: Some(field.completed),
                        interaction_count: Some(field.interactions),
                        field_position: Some(field.position),
                        ..Default::default()
                    }),
            )
        });

        if let Some(event) = event.flatten() {
            self.scheduler.enqueue(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Beacon, DeliveryChannel, Transport};
    use crate::scheduler::SchedulerConfig;
    use crate::store::DurableStore;
    use async_trait::async_trait;

    struct Hold;

    #[async_trait]
    impl Transport for Hold {
        async fn post(&self, _body: Vec<u8>) -> Result<()> {
            Err(Error::Delivery("offline".to_string()))
        }
    }

    impl Beacon for Hold {
        fn send(&self, _body: Vec<u8>) -> bool {
            false
        }
    }

    /// Tracker over a scheduler that never delivers, so every event stays queued
    fn setup(track_changes: bool) -> (FormTracker, BatchScheduler) {
        let channel = DeliveryChannel::new("pk", Arc::new(Hold), Arc::new(Hold));
        let scheduler = BatchScheduler::start(
            SchedulerConfig {
                batch_size: 1000,
                flush_interval: Duration::from_secs(3600),
            },
            channel,
            DurableStore::unavailable(),
        )
        .unwrap();
        let tracker = FormTracker::new(
            "session-1",
            TrackerConfig {
                track_changes,
                blur_debounce: Duration::from_millis(300),
            },
            scheduler.clone(),
        )
        .unwrap();
        (tracker, scheduler)
    }

    fn kinds(scheduler: &BatchScheduler) -> Vec<EventKind> {
        scheduler
            .pending_events()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    fn signup(tracker: &FormTracker) -> (String, Arc<FieldHandle>, Arc<FieldHandle>) {
        let email = FieldHandle::new();
        let name = FieldHandle::new();
        let form_id = tracker.register_form(
            FormDescriptor::new()
                .with_id("signup")
                .with_field(FieldDescriptor::new("hidden", FieldHandle::new()).with_id("csrf"))
                .with_field(FieldDescriptor::new("email", email.clone()).with_id("email"))
                .with_field(FieldDescriptor::new("text", name.clone()).with_name("name")),
        );
        (form_id, email, name)
    }

    #[tokio::test]
    async fn test_register_skips_non_data_fields() {
        let (tracker, _) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        assert_eq!(form_id, "signup");
        let summary = &tracker.analytics()[0];
        assert_eq!(summary.fields_total, 2);

        // re-registering is a no-op
        signup(&tracker);
        assert_eq!(tracker.analytics().len(), 1);
    }

    #[tokio::test]
    async fn test_focus_event_metadata() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_focus(&form_id, "name");

        let events = scheduler.pending_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventKind::Focus);
        assert_eq!(event.field_id, "name");
        assert_eq!(event.session_id, "session-1");
        let metadata = event.metadata.as_ref().unwrap();
        assert_eq!(metadata.field_position, Some(2));
        assert_eq!(metadata.total_fields, Some(2));
        assert_eq!(metadata.interaction_count, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_field_is_ignored() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_focus(&form_id, "csrf");
        tracker.field_focus("missing", "email");
        tracker.form_submit("missing");

        assert!(scheduler.pending_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refocus_within_window_cancels_blur() {
        let (tracker, scheduler) = setup(false);
        let (form_id, email, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tracker.field_blur(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(100)).await;
        tracker.field_focus(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(kinds(&scheduler), vec![EventKind::Focus]);

        email.set_filled(true);
        tracker.field_blur(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(400)).await;

        let events = scheduler.pending_events();
        assert_eq!(kinds(&scheduler), vec![EventKind::Focus, EventKind::Blur]);
        let blur = &events[1];
        assert_eq!(blur.duration_ms, Some(1600));
        assert_eq!(blur.metadata.as_ref().unwrap().completed, Some(true));

        let summary = &tracker.analytics()[0];
        assert_eq!(summary.fields_completed, 1);
        assert_eq!(summary.time_spent_ms, 1600);
        assert_eq!(summary.interactions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_blur_reschedules_once() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        tracker.field_blur(&form_id, "email");
        tracker.field_blur(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(kinds(&scheduler), vec![EventKind::Focus, EventKind::Blur]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_field_is_dropped_on_blur() {
        let (tracker, scheduler) = setup(false);
        let (form_id, email, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        email.detach();
        tracker.field_blur(&form_id, "email");
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(kinds(&scheduler), vec![EventKind::Focus]);
        assert_eq!(tracker.analytics()[0].fields_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_blurs() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        tracker.field_blur(&form_id, "email");
        tracker.shutdown();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(kinds(&scheduler), vec![EventKind::Focus]);
    }

    #[tokio::test]
    async fn test_change_events_respect_toggle() {
        let (tracker, scheduler) = setup(false);
        let (form_id, email, _) = signup(&tracker);
        email.set_filled(true);
        tracker.field_change(&form_id, "email");
        assert!(scheduler.pending_events().is_empty());
        assert_eq!(tracker.analytics()[0].fields_completed, 1);

        let (tracker, scheduler) = setup(true);
        let (form_id, _, _) = signup(&tracker);
        tracker.field_change(&form_id, "email");
        assert_eq!(kinds(&scheduler), vec![EventKind::Change]);
    }

    #[tokio::test]
    async fn test_validation_errors_are_counted() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_invalid(&form_id, "email");
        tracker.field_invalid(&form_id, "email");

        let events = scheduler.pending_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventKind::Error);
        assert_eq!(events[1].metadata.as_ref().unwrap().error_count, Some(2));
    }

    #[tokio::test]
    async fn test_submit_is_form_level() {
        let (tracker, scheduler) = setup(false);
        let (form_id, email, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        email.set_filled(true);
        tracker.form_submit(&form_id);

        let events = scheduler.pending_events();
        let submit = events.last().unwrap();
        assert_eq!(submit.event_type, EventKind::Submit);
        assert!(submit.is_form_level());
        assert!(submit.duration_ms.is_some());
        let metadata = submit.metadata.as_ref().unwrap();
        assert_eq!(metadata.completed_fields, Some(1));
        assert_eq!(metadata.total_fields, Some(2));
        assert!(tracker.analytics()[0].submitted);
    }

    #[tokio::test]
    async fn test_abandonment_requires_focus() {
        let (tracker, scheduler) = setup(false);
        let (signup_id, _, _) = signup(&tracker);
        let probe = FieldHandle::new();
        let errors_only = tracker.register_form(
            FormDescriptor::new()
                .with_id("errors-only")
                .with_field(FieldDescriptor::new("text", probe.clone()).with_id("q")),
        );
        let submitted = tracker.register_form(
            FormDescriptor::new()
                .with_id("submitted")
                .with_field(FieldDescriptor::new("text", probe).with_id("q")),
        );

        tracker.field_focus(&signup_id, "email");
        tracker.field_invalid(&errors_only, "q");
        tracker.field_focus(&submitted, "q");
        tracker.form_submit(&submitted);

        assert_eq!(tracker.detect_abandonment(), 1);
        let abandon: Vec<FormEvent> = scheduler
            .pending_events()
            .into_iter()
            .filter(|e| e.event_type == EventKind::Abandon)
            .collect();
        assert_eq!(abandon.len(), 1);
        assert_eq!(abandon[0].form_id, "signup");
        assert_eq!(abandon[0].field_id, "email");

        // reported once per form
        assert_eq!(tracker.detect_abandonment(), 0);
    }

    #[tokio::test]
    async fn test_abandonment_rearmed_by_new_focus() {
        let (tracker, scheduler) = setup(false);
        let (form_id, _, _) = signup(&tracker);

        tracker.field_focus(&form_id, "email");
        assert_eq!(tracker.detect_abandonment(), 1);
        assert_eq!(tracker.detect_abandonment(), 0);

        // user comes back and leaves again
        tracker.field_focus(&form_id, "name");
        assert_eq!(tracker.detect_abandonment(), 1);

        let abandon: Vec<FormEvent> = scheduler
            .pending_events()
            .into_iter()
            .filter(|e| e.event_type == EventKind::Abandon)
            .collect();
        assert_eq!(abandon.len(), 2);
        assert_eq!(abandon[1].field_id, "name");

        // a submitted form stays quiet
        tracker.field_focus(&form_id, "email");
        tracker.form_submit(&form_id);
        assert_eq!(tracker.detect_abandonment(), 0);
    }

    #[tokio::test]
    async fn test_manual_track_validates_kind() {
        let (tracker, scheduler) = setup(false);

        tracker.track("promo", "code", "hover");
        assert!(scheduler.pending_events().is_empty());

        tracker.track("promo", "code", "interaction");
        let events = scheduler.pending_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventKind::Interaction);
        assert_eq!(events[0].form_id, "promo");
    }
}
