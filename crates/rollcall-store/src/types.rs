use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Row id of a registered user.
pub type UserId = i64;

/// Status written for every attendance record created by a face match.
pub const STATUS_PRESENT: &str = "Present";

/// Registration fields for a new user.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub enrollment: &'a str,
    pub college: &'a str,
    pub class: &'a str,
    pub section: &'a str,
    /// Encoded face template bytes.
    pub face_template: &'a [u8],
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub enrollment: String,
    pub college: String,
    pub class: String,
    pub section: String,
    /// Encoded face template as stored; decode before comparing.
    pub face_template: Vec<u8>,
    pub registered_at: NaiveDateTime,
}

/// One day's attendance for one user. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: String,
}

/// Attendance record joined with the owning user's descriptive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEntry {
    pub name: String,
    pub enrollment: String,
    pub college: String,
    pub class: String,
    pub section: String,
    pub record: AttendanceRecord,
}

/// Result of a mark-attendance call that reached the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkResult {
    /// A new record was written.
    Marked(AttendanceRecord),
    /// The user already has a record for that calendar date; nothing written.
    AlreadyMarkedToday,
}
