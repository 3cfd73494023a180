//! HTTP request handlers for the rowsync API.
//!
//! - `sync_record` - on-demand delivery of a single record
//! - `health` - health, readiness and liveness checks

pub mod health;
pub mod sync_record;

pub use health::{health_check, liveness_check, readiness_check};
pub use sync_record::sync_record;
