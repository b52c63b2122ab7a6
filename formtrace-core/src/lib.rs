//! # formtrace-core
//!
//! Core library for formtrace - a form-interaction telemetry agent.
//!
//! The agent observes focus, blur, submit, validation and abandonment on
//! forms and relays metadata (never field values) to a collection endpoint.
//!
//! This library provides:
//! - Event and batch types with their JSON wire format
//! - A batch scheduler with size/time thresholds and retry-via-persistence
//! - A bounded durable store for undelivered events
//! - HTTP delivery, with a fire-and-forget beacon for teardown
//! - Lifecycle hooks and a form tracker producing events
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! FormTracker ──enqueue──► BatchScheduler ──batch──► DeliveryChannel ──► endpoint
//!                              ▲      │ failure
//!                    restore   │      ▼
//!                           DurableStore
//! LifecycleHooks ──emergency flush──► BatchScheduler
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use formtrace_core::{Config, FormTelemetry, LifecycleSignal};
//!
//! # async fn run() -> formtrace_core::Result<()> {
//! let config = Config::load()?;
//! let telemetry = FormTelemetry::connect(&config)?;
//!
//! telemetry.track("newsletter", "email", "interaction");
//! telemetry.signal(LifecycleSignal::PageHide);
//! telemetry.destroy();
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use agent::{open_store, FormTelemetry};
pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleHooks, LifecycleSignal};
pub use scheduler::{BatchScheduler, CycleOutcome, EmergencyOutcome, SchedulerConfig};
pub use store::DurableStore;
pub use types::*;

// Public modules
pub mod agent;
pub mod config;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod tracker;
pub mod types;
