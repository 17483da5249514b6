use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::queries;
use crate::models::attendance::{AttendanceMark, AttendanceStatus, RosterEntry};

/// Day-scoped attendance ledger.
#[async_trait]
pub trait AttendanceRecorder: Send + Sync {
    /// Record a mark. Idempotent per student, course and day; returns
    /// whether the ledger changed.
    async fn mark(&self, mark: &AttendanceMark) -> Result<bool, LedgerError>;
}

/// Course enrollment lookup.
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    /// Enrolled students of `course_id`, or `None` if the course is unknown.
    async fn enrolled(&self, course_id: &str) -> Result<Option<Vec<RosterEntry>>, LedgerError>;
}

/// PostgreSQL-backed ledger and roster.
#[derive(Clone)]
pub struct PgAttendance {
    pool: PgPool,
}

impl PgAttendance {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceRecorder for PgAttendance {
    async fn mark(&self, mark: &AttendanceMark) -> Result<bool, LedgerError> {
        Ok(queries::mark_attendance(&self.pool, mark).await?)
    }
}

#[async_trait]
impl RosterDirectory for PgAttendance {
    async fn enrolled(&self, course_id: &str) -> Result<Option<Vec<RosterEntry>>, LedgerError> {
        Ok(queries::course_roster(&self.pool, course_id).await?)
    }
}

type LedgerKey = (String, String, NaiveDate);

/// Ledger kept in process memory, with the same upgrade rules as the
/// database: present overrides absent, never the other way round.
#[derive(Debug, Default)]
pub struct InMemoryAttendance {
    records: Mutex<HashMap<LedgerKey, AttendanceStatus>>,
}

impl InMemoryAttendance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, student_id: &str, course_id: &str, date: NaiveDate) -> Option<AttendanceStatus> {
        self.records
            .lock()
            .get(&(student_id.to_string(), course_id.to_string(), date))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AttendanceRecorder for InMemoryAttendance {
    async fn mark(&self, mark: &AttendanceMark) -> Result<bool, LedgerError> {
        let key = (mark.student_id.clone(), mark.course_id.clone(), mark.date);
        let mut records = self.records.lock();
        match records.get(&key).copied() {
            None => {
                records.insert(key, mark.status);
                Ok(true)
            }
            Some(AttendanceStatus::Absent) if mark.status == AttendanceStatus::Present => {
                records.insert(key, AttendanceStatus::Present);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }
}

/// Fixed set of course rosters.
#[derive(Debug, Default, Clone)]
pub struct StaticRoster {
    courses: HashMap<String, Vec<RosterEntry>>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, course_id: &str, students: &[(&str, &str)]) -> Self {
        let entries = students
            .iter()
            .map(|(id, name)| RosterEntry {
                student_id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        self.courses.insert(course_id.to_string(), entries);
        self
    }
}

#[async_trait]
impl RosterDirectory for StaticRoster {
    async fn enrolled(&self, course_id: &str) -> Result<Option<Vec<RosterEntry>>, LedgerError> {
        Ok(self.courses.get(course_id).cloned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Attendance ledger unavailable: {0}")]
    Unavailable(String),
}
