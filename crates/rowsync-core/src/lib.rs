//! Core domain models and storage for record synchronization.
//!
//! Provides the `Record` entity with its delivery state, the category
//! groups that drive eligibility, the nullable column wrapper used for
//! business fields, and the PostgreSQL repository every other crate
//! reads and writes records through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Category, CategoryGroup, Nullable, Record, RecordCode, SyncState, ACTIVE_STATE,
    APPROVED_AUDIT_STATE,
};
pub use time::{Clock, RealClock, TestClock};
