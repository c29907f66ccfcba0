//! Job repository — row operations for the `jobs` table.
//!
//! Every read that can cross jobs is scoped by `owner_id`; nothing in this
//! module returns another owner's rows from an owner-scoped query.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::job::{parse_status, FailureKind, JobPatch, JobRecord, JobStatus};
use super::{Database, DatabaseError};

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_string_list(s: Option<String>, column: &str, job_id: &str) -> Option<Vec<String>> {
    let s = s?;
    match serde_json::from_str(&s) {
        Ok(list) => Some(list),
        Err(e) => {
            log::warn!("Unreadable {} list for job {}: {}", column, job_id, e);
            None
        }
    }
}

fn from_row(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let analyzed_at: Option<String> = row.get("analyzed_at")?;
    let tags: Option<String> = row.get("tags")?;
    let dominant_colors: Option<String> = row.get("dominant_colors")?;

    Ok(JobRecord {
        owner_id: row.get("owner_id")?,
        original_name: row.get("original_name")?,
        mime_type: row.get("mime_type")?,
        byte_size: row.get::<_, i64>("byte_size")? as u64,
        stored_artifact_path: row.get("stored_artifact_path")?,
        thumbnail_artifact_path: row.get("thumbnail_artifact_path")?,
        thumb_width: row.get::<_, Option<i64>>("thumb_width")?.map(|w| w as u32),
        thumb_height: row.get::<_, Option<i64>>("thumb_height")?.map(|h| h as u32),
        caption: row.get("caption")?,
        status: parse_status(&status, &id),
        progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
        tags: parse_string_list(tags, "tags", &id),
        description: row.get("description")?,
        dominant_colors: parse_string_list(dominant_colors, "dominant_colors", &id),
        error_detail: row.get("error_detail")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        analyzed_at: analyzed_at.as_deref().map(parse_timestamp),
        id,
    })
}

/// SQL fragment listing the non-terminal statuses.
fn active_status_list() -> String {
    JobStatus::ACTIVE
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRecord) -> Result<(), DatabaseError> {
    let tags = job.tags.as_ref().and_then(|t| serde_json::to_string(t).ok());
    let colors = job
        .dominant_colors
        .as_ref()
        .and_then(|c| serde_json::to_string(c).ok());

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, original_name, mime_type, byte_size,
             stored_artifact_path, thumbnail_artifact_path, thumb_width, thumb_height,
             caption, status, progress, tags, description, dominant_colors, error_detail,
             created_at, updated_at, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
             ?16, ?17, ?18, ?19)",
            params![
                job.id,
                job.owner_id,
                job.original_name,
                job.mime_type,
                job.byte_size as i64,
                job.stored_artifact_path,
                job.thumbnail_artifact_path,
                job.thumb_width.map(|w| w as i64),
                job.thumb_height.map(|h| h as i64),
                job.caption,
                job.status.as_str(),
                job.progress as i64,
                tags,
                job.description,
                colors,
                job.error_detail,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                job.analyzed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID, regardless of owner. Internal callers only;
/// owner-facing paths use [`find_owned`].
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a job by ID, visible only to its owner.
pub fn find_owned(
    db: &Database,
    owner_id: &str,
    id: &str,
) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1 AND owner_id = ?2")?;
        let mut rows = stmt.query_map(params![id, owner_id], from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns the owner's active set: every non-terminal job, oldest first.
pub fn query_active(db: &Database, owner_id: &str) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM jobs WHERE owner_id = ?1 AND status IN ({}) ORDER BY created_at ASC",
        active_status_list()
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRecord> = stmt
            .query_map(params![owner_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Applies a partial update to a single row. Only fields set on the patch
/// are written; `updated_at` is always refreshed.
pub fn apply(db: &Database, id: &str, patch: &JobPatch) -> Result<(), DatabaseError> {
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(id.to_string())];

    let push = |sets: &mut Vec<String>,
                    values: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
                    column: &str,
                    value: Box<dyn rusqlite::types::ToSql>| {
        values.push(value);
        sets.push(format!("{} = ?{}", column, values.len()));
    };

    if let Some(status) = patch.status {
        push(&mut sets, &mut values, "status", Box::new(status.as_str()));
    }
    if let Some(progress) = patch.progress {
        push(&mut sets, &mut values, "progress", Box::new(progress as i64));
    }
    if let Some(ref path) = patch.stored_artifact_path {
        push(
            &mut sets,
            &mut values,
            "stored_artifact_path",
            Box::new(path.clone()),
        );
    }
    if let Some(ref path) = patch.thumbnail_artifact_path {
        push(
            &mut sets,
            &mut values,
            "thumbnail_artifact_path",
            Box::new(path.clone()),
        );
    }
    if let Some(width) = patch.thumb_width {
        push(&mut sets, &mut values, "thumb_width", Box::new(width as i64));
    }
    if let Some(height) = patch.thumb_height {
        push(
            &mut sets,
            &mut values,
            "thumb_height",
            Box::new(height as i64),
        );
    }
    if let Some(ref tags) = patch.tags {
        let json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        push(&mut sets, &mut values, "tags", Box::new(json));
    }
    if let Some(ref description) = patch.description {
        push(
            &mut sets,
            &mut values,
            "description",
            Box::new(description.clone()),
        );
    }
    if let Some(ref colors) = patch.dominant_colors {
        let json = serde_json::to_string(colors).unwrap_or_else(|_| "[]".to_string());
        push(&mut sets, &mut values, "dominant_colors", Box::new(json));
    }
    if let Some(ref detail) = patch.error_detail {
        push(
            &mut sets,
            &mut values,
            "error_detail",
            Box::new(detail.clone()),
        );
    }
    if let Some(analyzed_at) = patch.analyzed_at {
        push(
            &mut sets,
            &mut values,
            "analyzed_at",
            Box::new(format_timestamp(analyzed_at)),
        );
    }

    push(
        &mut sets,
        &mut values,
        "updated_at",
        Box::new(format_timestamp(Utc::now())),
    );

    let sql = format!("UPDATE jobs SET {} WHERE id = ?1", sets.join(", "));
    db.with_conn(|conn| {
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        Ok(())
    })
}

/// Force-fails one job if (and only if) it is still non-terminal.
///
/// Progress is left untouched. Returns whether the row changed, so a
/// repeated call on a terminal job is a visible no-op. Safe to race with a
/// live executor: both writers converge on a terminal state.
pub fn force_fail_if_active(
    db: &Database,
    id: &str,
    kind: FailureKind,
    reason: &str,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET status = 'failed', error_detail = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN ({})",
        active_status_list()
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![id, kind.detail(reason), format_timestamp(Utc::now())],
        )?;
        Ok(changed > 0)
    })
}

/// Force-fails every active job for an owner. Returns how many rows changed.
pub fn force_fail_all_active(
    db: &Database,
    owner_id: &str,
    kind: FailureKind,
    reason: &str,
) -> Result<u64, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET status = 'failed', error_detail = ?2, updated_at = ?3
         WHERE owner_id = ?1 AND status IN ({})",
        active_status_list()
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![owner_id, kind.detail(reason), format_timestamp(Utc::now())],
        )?;
        Ok(changed as u64)
    })
}

/// Counts the owner's jobs with the given status.
pub fn count_by_status(
    db: &Database,
    owner_id: &str,
    status: JobStatus,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE owner_id = ?1 AND status = ?2",
            params![owner_id, status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
