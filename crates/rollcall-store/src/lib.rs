//! rollcall-store — Users and daily attendance on SQLite.
//!
//! The store owns both tables. Each public operation runs as a single
//! autocommitted statement (or a read followed by one write), so success is
//! only reported once the change is on disk.

pub mod store;
pub mod types;

pub use store::{AttendanceStore, StoreError};
pub use types::{AttendanceEntry, AttendanceRecord, MarkResult, NewUser, User, UserId, STATUS_PRESENT};
