//! Core domain types for formtrace
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One observed interaction with a form or field; never mutated after creation |
//! | **Batch** | Wire payload wrapping a project key and an ordered slice of events |
//! | **Session** | One agent handle's lifetime; every event carries its session id |
//! | **Form-level event** | An event about the whole form, with field id [`FORM_LEVEL_FIELD`] |
//!
//! Events carry metadata only. Field values are never read into an event;
//! the most a field contributes is a completion flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Field identifier used for events that concern the whole form
pub const FORM_LEVEL_FIELD: &str = "__form__";

// ============================================
// Event
// ============================================

/// Kind of interaction an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Focus,
    Blur,
    Submit,
    Abandon,
    Error,
    Change,
    Interaction,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::Submit => "submit",
            EventKind::Abandon => "abandon",
            EventKind::Error => "error",
            EventKind::Change => "change",
            EventKind::Interaction => "interaction",
        }
    }

    pub const ALL: [EventKind; 7] = [
        EventKind::Focus,
        EventKind::Blur,
        EventKind::Submit,
        EventKind::Abandon,
        EventKind::Error,
        EventKind::Change,
        EventKind::Interaction,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidEventKind(s.to_string()))
    }
}

/// Numeric and boolean counters attached to an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    /// 1-based position of the field within its form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fields: Option<usize>,
    /// Completed fields at submit/abandon time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_fields: Option<usize>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        *self == EventMetadata::default()
    }
}

/// One observed interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEvent {
    pub form_id: String,
    /// Field identifier, or [`FORM_LEVEL_FIELD`]
    pub field_id: String,
    pub event_type: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub session_id: String,
    /// ISO-8601 creation time
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl FormEvent {
    /// Create an event stamped with the current time
    pub fn new(
        session_id: impl Into<String>,
        form_id: impl Into<String>,
        field_id: impl Into<String>,
        event_type: EventKind,
    ) -> Self {
        Self {
            form_id: form_id.into(),
            field_id: field_id.into(),
            event_type,
            duration_ms: None,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach metadata; empty metadata is omitted from the wire
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn is_form_level(&self) -> bool {
        self.field_id == FORM_LEVEL_FIELD
    }
}

// ============================================
// Batch
// ============================================

/// Wire payload for one delivery attempt
///
/// Borrowed so building a batch never copies the pending events.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventBatch<'a> {
    pub project_key: &'a str,
    pub events: &'a [FormEvent],
}

impl<'a> EventBatch<'a> {
    pub fn new(project_key: &'a str, events: &'a [FormEvent]) -> Self {
        Self {
            project_key,
            events,
        }
    }

    /// JSON body as sent on the wire
    pub fn to_json(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================
// Analytics
// ============================================

/// Aggregate per-form counts derived from in-memory tracker state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormSummary {
    pub form_id: String,
    pub fields_total: usize,
    pub fields_completed: usize,
    pub interactions: u32,
    pub time_spent_ms: u64,
    pub submitted: bool,
}
