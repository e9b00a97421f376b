//! SQLite-backed attendance store.

use crate::types::{
    AttendanceEntry, AttendanceRecord, MarkResult, NewUser, User, UserId, STATUS_PRESENT,
};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL,
    enrollment        TEXT NOT NULL UNIQUE,
    college           TEXT NOT NULL,
    class             TEXT NOT NULL,
    section           TEXT NOT NULL,
    face_template     BLOB NOT NULL,
    registration_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users (id),
    date    TEXT NOT NULL,
    time    TEXT NOT NULL,
    status  TEXT NOT NULL DEFAULT 'Present'
);

CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance (user_id, date);
";

const USER_COLUMNS: &str =
    "id, name, enrollment, college, class, section, face_template, registration_date";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("enrollment {0:?} is already registered")]
    DuplicateEnrollment(String),
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Process-wide handle to the attendance database.
pub struct AttendanceStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl AttendanceStore {
    /// Open (or create) the database at `path`, creating parent directories
    /// and tables as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::DataDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        tracing::info!(path = %path.display(), "attendance store opened");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn, path: None })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Database file path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a new user stamped with the current local time.
    pub fn register_user(&self, user: &NewUser<'_>) -> Result<UserId, StoreError> {
        self.register_user_at(user, Local::now().naive_local())
    }

    /// Insert a new user with an explicit registration timestamp.
    ///
    /// Fails with [`StoreError::DuplicateEnrollment`] when the enrollment is
    /// already taken; nothing is written in that case.
    pub fn register_user_at(
        &self,
        user: &NewUser<'_>,
        registered_at: NaiveDateTime,
    ) -> Result<UserId, StoreError> {
        let result = self.conn.execute(
            "INSERT INTO users (name, enrollment, college, class, section, face_template, registration_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.name,
                user.enrollment,
                user.college,
                user.class,
                user.section,
                user.face_template,
                registered_at.format(DATETIME_FORMAT).to_string(),
            ],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(user_id = id, enrollment = user.enrollment, "user registered");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::info!(enrollment = user.enrollment, "duplicate enrollment rejected");
                Err(StoreError::DuplicateEnrollment(user.enrollment.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exact, case-sensitive lookup on name and enrollment.
    pub fn find_user_by_credentials(
        &self,
        name: &str,
        enrollment: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE name = ?1 AND enrollment = ?2"),
                params![name, enrollment],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Record the user as present on the calendar date of `at`.
    ///
    /// At most one record exists per (user, date): if one is already there,
    /// returns [`MarkResult::AlreadyMarkedToday`] without writing. Time of day
    /// is kept to whole seconds.
    pub fn mark_attendance(
        &self,
        user_id: UserId,
        at: NaiveDateTime,
    ) -> Result<MarkResult, StoreError> {
        let date = at.date();
        let time = at.time().with_nanosecond(0).unwrap_or_else(|| at.time());
        let date_str = date.format(DATE_FORMAT).to_string();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM attendance WHERE user_id = ?1 AND date = ?2 LIMIT 1",
                params![user_id, date_str],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(record_id) = existing {
            tracing::info!(user_id, date = %date, record_id, "attendance already marked");
            return Ok(MarkResult::AlreadyMarkedToday);
        }

        self.conn.execute(
            "INSERT INTO attendance (user_id, date, time, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id,
                date_str,
                time.format(TIME_FORMAT).to_string(),
                STATUS_PRESENT,
            ],
        )?;

        let record = AttendanceRecord {
            id: self.conn.last_insert_rowid(),
            user_id,
            date,
            time,
            status: STATUS_PRESENT.to_string(),
        };
        tracing::info!(user_id, date = %date, time = %time, record_id = record.id, "attendance marked");

        Ok(MarkResult::Marked(record))
    }

    /// All attendance for `user_id`, most recent first.
    pub fn list_attendance(&self, user_id: UserId) -> Result<Vec<AttendanceEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT u.name, u.enrollment, u.college, u.class, u.section,
                    a.id, a.user_id, a.date, a.time, a.status
             FROM attendance a
             JOIN users u ON a.user_id = u.id
             WHERE a.user_id = ?1
             ORDER BY a.date DESC, a.time DESC, a.id DESC",
        )?;

        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(AttendanceEntry {
                    name: row.get(0)?,
                    enrollment: row.get(1)?,
                    college: row.get(2)?,
                    class: row.get(3)?,
                    section: row.get(4)?,
                    record: AttendanceRecord {
                        id: row.get(5)?,
                        user_id: row.get(6)?,
                        date: parse_column(row, 7, |s| NaiveDate::parse_from_str(s, DATE_FORMAT))?,
                        time: parse_column(row, 8, |s| NaiveTime::parse_from_str(s, TIME_FORMAT))?,
                        status: row.get(9)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(user_id, count = entries.len(), "listed attendance");
        Ok(entries)
    }

    /// Number of attendance records for `user_id` on `date`.
    pub fn attendance_count_on(&self, user_id: UserId, date: NaiveDate) -> Result<u32, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE user_id = ?1 AND date = ?2",
            params![user_id, date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Close the connection, surfacing any error SQLite reports on shutdown.
    pub fn close(self) -> Result<(), StoreError> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        tracing::info!(path = ?path, "attendance store closed");
        Ok(())
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Read a text column and parse it, reporting parse failures as conversion errors.
fn parse_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Result<T, chrono::ParseError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        enrollment: row.get(2)?,
        college: row.get(3)?,
        class: row.get(4)?,
        section: row.get(5)?,
        face_template: row.get(6)?,
        registered_at: parse_column(row, 7, |s| {
            NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        })?,
    })
}
