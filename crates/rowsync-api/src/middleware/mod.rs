//! HTTP middleware for request processing.

pub mod logging;

pub use logging::{inject_request_id, log_request};
