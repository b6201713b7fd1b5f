//! Core types shared across contentdb crates
//!
//! - **Correlation types**: `RequestId`, `TraceId`, `RequestContext`
//! - **Schema constants**: canonical field keys and event names used by
//!   the structured logging facility

pub mod correlation;
pub mod schema;

pub use correlation::{RequestContext, RequestId, TraceId};
