use sqlx::{PgPool, Row};

use crate::models::attendance::{AttendanceMark, AttendanceStatus, RosterEntry};

/// Write one attendance mark.
///
/// At most one row exists per student, course and day. A present mark
/// upgrades an earlier absent mark; every other repeat is a no-op.
/// Returns `true` when the ledger changed.
pub async fn mark_attendance(pool: &PgPool, mark: &AttendanceMark) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance (student_id, course_id, attendance_date, status, recorded_by, job_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (student_id, course_id, attendance_date) DO UPDATE
        SET status = EXCLUDED.status,
            recorded_by = EXCLUDED.recorded_by,
            job_id = EXCLUDED.job_id,
            recorded_at = now()
        WHERE attendance.status = 'absent' AND EXCLUDED.status = 'present'
        "#,
    )
    .bind(&mark.student_id)
    .bind(&mark.course_id)
    .bind(mark.date)
    .bind(mark.status.to_string())
    .bind(mark.recorded_by.as_deref())
    .bind(mark.job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Look up the enrolled students of a course. `None` if the course does not exist.
pub async fn course_roster(
    pool: &PgPool,
    course_id: &str,
) -> Result<Option<Vec<RosterEntry>>, sqlx::Error> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM courses WHERE course_id = $1)")
            .bind(course_id)
            .fetch_one(pool)
            .await?;

    if !exists {
        return Ok(None);
    }

    let rows = sqlx::query(
        r#"
        SELECT s.student_id, s.name
        FROM enrollments e
        JOIN students s ON s.student_id = e.student_id
        WHERE e.course_id = $1
        ORDER BY s.student_id
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let roster = rows
        .into_iter()
        .map(|r| {
            Ok(RosterEntry {
                student_id: r.try_get("student_id")?,
                name: r.try_get("name")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Some(roster))
}

/// Attendance status of a student on a given day, if recorded.
pub async fn attendance_status(
    pool: &PgPool,
    student_id: &str,
    course_id: &str,
    date: chrono::NaiveDate,
) -> Result<Option<AttendanceStatus>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT status
        FROM attendance
        WHERE student_id = $1 AND course_id = $2 AND attendance_date = $3
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => {
            let status: String = r.try_get("status")?;
            status.parse().ok()
        }
        None => None,
    })
}
