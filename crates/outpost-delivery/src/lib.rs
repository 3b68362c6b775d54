//! Background delivery engine for telemetry payloads.
//!
//! This crate moves payloads from application threads to a remote ingestion
//! service without ever blocking the caller on network I/O. Each feature
//! (errors, metrics, traces, events) gets its own bounded queue and a
//! dedicated OS thread that batches payloads and hands them to a `Backend`.
//!
//! # Architecture
//!
//! The `WorkerSupervisor` owns one `DeliveryWorker` per feature. Producers
//! call `push`, which checks feature enablement and enqueues under a
//! short-held lock. The worker thread handles the rest of the lifecycle:
//!
//! 1. **Batch** - Buffer payloads until the size or age trigger fires
//! 2. **Deliver** - Hand the sealed batch to the backend
//! 3. **Interpret** - Map the response to a control action
//! 4. **Apply** - Adjust the throttle, suspend, or disable the feature
//!
//! # Key Features
//!
//! - **Non-blocking Producers** - Full queues drop new payloads instead of
//!   waiting
//! - **Adaptive Throttle** - Exponential pause between deliveries while the
//!   service rate-limits
//! - **Suspension** - Billing and authorization failures halt delivery for a
//!   cool-down window and discard the backlog
//! - **Synchronous Flush** - Callers can wait until everything pushed so far
//!   has been handed to the backend
//! - **Fork Safety** - Workers detect a changed pid and start over
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use outpost_core::{Feature, Payload};
//! use outpost_delivery::{DeliveryConfig, NullBackend, Scope, WorkerEnv, WorkerSupervisor};
//!
//! # fn example() -> outpost_delivery::Result<()> {
//! let supervisor =
//!     WorkerSupervisor::new(DeliveryConfig::default(), WorkerEnv::new(Arc::new(NullBackend)))?;
//!
//! supervisor.push(Payload::new(Feature::Events, &b"{\"event\":\"signup\"}"[..]));
//! supervisor.flush(Scope::All);
//! supervisor.stop(false);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod features;
pub mod queue;
pub mod response;
pub mod supervisor;
pub mod throttle;
pub mod worker;

pub use backend::{Backend, DebugBackend, NullBackend};
pub use config::{DeliveryConfig, FeatureConfig};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use features::FeatureFlags;
pub use response::{Action, LogReason, ResponseInterpreter};
pub use supervisor::{Scope, WorkerSupervisor};
pub use worker::{DeliveryWorker, WorkerEnv, WorkerState, WorkerStats};

/// Default suspension window after a billing or authorization failure.
pub const DEFAULT_SUSPEND_SECONDS: u64 = 3600;

/// Default base of the exponential throttle curve.
pub const DEFAULT_THROTTLE_BASE: f64 = 1.05;
