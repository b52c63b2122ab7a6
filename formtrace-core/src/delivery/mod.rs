//! Delivery channel for event batches
//!
//! Two strategies share one wire format (`{ project_key, events }` as JSON):
//!
//! - **Normal delivery** awaits an async [`Transport`] and reports failure
//!   for transport errors and non-2xx statuses alike.
//! - **Emergency delivery** hands the payload to a [`Beacon`], which either
//!   accepts it for background transmission or rejects it on the spot. It
//!   never reports what happens after acceptance.

mod http;

use std::sync::Arc;

use async_trait::async_trait;

pub use http::{HttpBeacon, HttpTransport, BEACON_MAX_PAYLOAD};

use crate::error::Result;
use crate::types::{EventBatch, FormEvent};

/// Async request carrying a serialized batch
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a JSON body; `Ok` only for a 2xx response
    async fn post(&self, body: Vec<u8>) -> Result<()>;
}

/// Fire-and-forget submission used while the process is going away
pub trait Beacon: Send + Sync {
    /// Returns whether the payload was accepted for background delivery
    fn send(&self, body: Vec<u8>) -> bool;
}

/// Serializes batches and routes them to a transport or a beacon
#[derive(Clone)]
pub struct DeliveryChannel {
    project_key: String,
    transport: Arc<dyn Transport>,
    beacon: Arc<dyn Beacon>,
}

impl DeliveryChannel {
    pub fn new(
        project_key: impl Into<String>,
        transport: Arc<dyn Transport>,
        beacon: Arc<dyn Beacon>,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            transport,
            beacon,
        }
    }

    /// Normal delivery of one batch
    pub async fn deliver(&self, events: &[FormEvent]) -> Result<()> {
        let body = EventBatch::new(&self.project_key, events).to_json()?;
        self.transport.post(body).await
    }

    /// Emergency delivery; `false` means the caller still owns the events
    pub fn deliver_emergency(&self, events: &[FormEvent]) -> bool {
        match EventBatch::new(&self.project_key, events).to_json() {
            Ok(body) => self.beacon.send(body),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to encode emergency batch");
                false
            }
        }
    }
}
