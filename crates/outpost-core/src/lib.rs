//! Core domain primitives for the outpost delivery engine.
//!
//! Provides the feature taxonomy, payload and batch types, delivery responses,
//! and the clock and process abstractions that the delivery engine injects.
//! All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod process;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Batch, Feature, Payload, PayloadId, Response, ResponseCode};
pub use process::{CurrentProcess, ProcessInfo};
pub use time::{Clock, RealClock, TestClock};
