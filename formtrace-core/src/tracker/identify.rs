//! Form and field identification
//!
//! Identifiers come from markup attributes when present. Forms without an id
//! or name get a stable identifier derived from their action and field names,
//! so the same form yields the same id across page loads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Input types that never carry user data
const IGNORED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "image"];

/// Liveness capability for a tracked field element
///
/// Stands in for a weak element reference: the tracker never owns the
/// element, it only asks whether it still exists and whether it holds a
/// value. The value itself is never read.
pub trait FieldProbe: Send + Sync {
    fn is_connected(&self) -> bool;
    fn has_value(&self) -> bool;
}

/// Probe backed by two flags the host updates
#[derive(Debug)]
pub struct FieldHandle {
    connected: AtomicBool,
    filled: AtomicBool,
}

impl Default for FieldHandle {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            filled: AtomicBool::new(false),
        }
    }
}

impl FieldHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_filled(&self, filled: bool) {
        self.filled.store(filled, Ordering::Relaxed);
    }

    /// Mark the element as removed from the document
    pub fn detach(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl FieldProbe for FieldHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn has_value(&self) -> bool {
        self.filled.load(Ordering::Relaxed)
    }
}

/// A field as seen at registration time
#[derive(Clone)]
pub struct FieldDescriptor {
    pub id: Option<String>,
    pub name: Option<String>,
    pub input_type: String,
    pub probe: Arc<dyn FieldProbe>,
}

impl FieldDescriptor {
    pub fn new(input_type: impl Into<String>, probe: Arc<dyn FieldProbe>) -> Self {
        Self {
            id: None,
            name: None,
            input_type: input_type.into(),
            probe,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the field can carry user input
    pub fn is_trackable(&self) -> bool {
        !IGNORED_INPUT_TYPES
            .iter()
            .any(|t| self.input_type.eq_ignore_ascii_case(t))
    }
}

/// A form as seen at registration time
#[derive(Clone, Default)]
pub struct FormDescriptor {
    pub id: Option<String>,
    pub name: Option<String>,
    pub action: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl FormDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Identifier for a form: id, else name, else a hash of its shape
pub fn form_identifier(form: &FormDescriptor) -> String {
    if let Some(id) = non_empty(&form.id).or_else(|| non_empty(&form.name)) {
        return id.to_string();
    }

    let field_names: Vec<String> = form
        .fields
        .iter()
        .filter(|f| f.is_trackable())
        .enumerate()
        .map(|(index, field)| field_identifier(field, index))
        .collect();
    let shape = format!(
        "{}|{}",
        form.action.as_deref().unwrap_or(""),
        field_names.join(",")
    );

    let digest = Sha256::digest(shape.as_bytes());
    format!("form_{}", hex::encode(&digest[..6]))
}

/// Identifier for a field: id, else name, else its index among trackable fields
pub fn field_identifier(field: &FieldDescriptor, index: usize) -> String {
    non_empty(&field.id)
        .or_else(|| non_empty(&field.name))
        .map(str::to_string)
        .unwrap_or_else(|| format!("field_{}", index))
}
