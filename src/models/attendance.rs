use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Day-scoped attendance state stored in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// A student enrolled in a course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub student_id: String,
    pub name: String,
}

/// One write request against the attendance ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceMark {
    pub student_id: String,
    pub course_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub recorded_by: Option<String>,
    pub job_id: Option<Uuid>,
}

/// Best candidate returned by the identity index for a face vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub student_id: String,
    pub name: String,
    pub distance: f32,
}
