//! Typed query helpers for every table in the floorvc database.
//!
//! Helpers take a `&Connection` rather than the [`super::Database`] handle so
//! the same function can run standalone (`&db.conn()`) or as one step of a
//! [`super::Database::transaction`].

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::DatabaseError;
use crate::models::{
    Annotation, Branch, BranchStatus, Comment, Conflict, DocumentId, MergeRequest, MergeStatus,
    ParentType, ParseEnumError, Version,
};

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Current time, truncated to the stored precision.
pub fn now() -> DateTime<Utc> {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    parse_timestamp(&ts).unwrap_or_else(|_| Utc::now())
}

/// Fixed-width RFC 3339 so text order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn json_value_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn metadata_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Map<String, Value>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn json_text(value: Option<&Value>) -> Option<String> {
    value.map(Value::to_string)
}

// -- versions ---------------------------------------------------------------

const VERSION_COLUMNS: &str = "version_id, building_id, floor_id, branch_name, parent_version_id,
     version_type, version_number, branch_seq, commit_message, author, created_at,
     content_hash, content_size, metadata";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        version_id: row.get(0)?,
        document_id: DocumentId::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        branch_name: row.get(3)?,
        parent_version_id: row.get(4)?,
        version_type: enum_col(row, 5)?,
        version_number: row.get(6)?,
        branch_seq: row.get(7)?,
        commit_message: row.get(8)?,
        author: row.get(9)?,
        created_at: ts_col(row, 10)?,
        content_hash: row.get(11)?,
        content_size: row.get(12)?,
        metadata: metadata_col(row, 13)?,
    })
}

/// Insert a version metadata row. Content lives in the blob area.
pub fn insert_version(conn: &Connection, version: &Version) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO versions (version_id, building_id, floor_id, branch_name, parent_version_id,
         version_type, version_number, branch_seq, commit_message, author, created_at,
         content_hash, content_size, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            version.version_id,
            version.document_id.building_id,
            version.document_id.floor_id,
            version.branch_name,
            version.parent_version_id,
            version.version_type.as_str(),
            version.version_number,
            version.branch_seq,
            version.commit_message,
            version.author,
            format_timestamp(&version.created_at),
            version.content_hash,
            version.content_size,
            Value::Object(version.metadata.clone()).to_string(),
        ],
    )?;
    debug!(
        version_id = %version.version_id,
        branch = %version.branch_name,
        branch_seq = version.branch_seq,
        "inserted version"
    );
    Ok(())
}

/// Get a version by id.
pub fn get_version(conn: &Connection, version_id: &str) -> Result<Option<Version>, DatabaseError> {
    let sql = format!("SELECT {VERSION_COLUMNS} FROM versions WHERE version_id = ?1");
    let version = conn
        .query_row(&sql, params![version_id], version_from_row)
        .optional()?;
    Ok(version)
}

/// The parent pointer of a version: `None` if the version does not exist,
/// `Some(None)` for a root version.
pub fn get_parent_id(
    conn: &Connection,
    version_id: &str,
) -> Result<Option<Option<String>>, DatabaseError> {
    let parent = conn
        .query_row(
            "SELECT parent_version_id FROM versions WHERE version_id = ?1",
            params![version_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(parent)
}

/// Versions of a document, newest first, optionally limited to one branch.
///
/// Ordering uses the autoincrement insertion id, which is strictly
/// monotonic regardless of wall-clock skew.
pub fn list_versions(
    conn: &Connection,
    document_id: &DocumentId,
    branch_name: Option<&str>,
) -> Result<Vec<Version>, DatabaseError> {
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM versions
         WHERE building_id = ?1 AND floor_id = ?2 AND (?3 IS NULL OR branch_name = ?3)
         ORDER BY id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let versions = stmt
        .query_map(
            params![document_id.building_id, document_id.floor_id, branch_name],
            version_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}

/// Next per-branch sequence number (1 for the first version of a branch).
pub fn next_branch_seq(
    conn: &Connection,
    document_id: &DocumentId,
    branch_name: &str,
) -> Result<i64, DatabaseError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(branch_seq) FROM versions
         WHERE building_id = ?1 AND floor_id = ?2 AND branch_name = ?3",
        params![document_id.building_id, document_id.floor_id, branch_name],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}

// -- branches ---------------------------------------------------------------

const BRANCH_COLUMNS: &str = "branch_name, building_id, floor_id, base_version_id,
     current_version_id, status, created_by, created_at, last_updated, description";

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        branch_name: row.get(0)?,
        document_id: DocumentId::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        base_version_id: row.get(3)?,
        current_version_id: row.get(4)?,
        status: enum_col(row, 5)?,
        created_by: row.get(6)?,
        created_at: ts_col(row, 7)?,
        last_updated: ts_col(row, 8)?,
        description: row.get(9)?,
    })
}

/// Insert a new branch row.
pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO branches (branch_name, building_id, floor_id, base_version_id,
         current_version_id, status, created_by, created_at, last_updated, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            branch.branch_name,
            branch.document_id.building_id,
            branch.document_id.floor_id,
            branch.base_version_id,
            branch.current_version_id,
            branch.status.as_str(),
            branch.created_by,
            format_timestamp(&branch.created_at),
            format_timestamp(&branch.last_updated),
            branch.description,
        ],
    )?;
    debug!(branch = %branch.branch_name, document = %branch.document_id, "inserted branch");
    Ok(())
}

/// Get a branch by name within a document scope.
pub fn get_branch(
    conn: &Connection,
    branch_name: &str,
    document_id: &DocumentId,
) -> Result<Option<Branch>, DatabaseError> {
    let sql = format!(
        "SELECT {BRANCH_COLUMNS} FROM branches
         WHERE branch_name = ?1 AND building_id = ?2 AND floor_id = ?3"
    );
    let branch = conn
        .query_row(
            &sql,
            params![branch_name, document_id.building_id, document_id.floor_id],
            branch_from_row,
        )
        .optional()?;
    Ok(branch)
}

/// All branches of a document, newest first.
pub fn list_branches(
    conn: &Connection,
    document_id: &DocumentId,
) -> Result<Vec<Branch>, DatabaseError> {
    let sql = format!(
        "SELECT {BRANCH_COLUMNS} FROM branches
         WHERE building_id = ?1 AND floor_id = ?2
         ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let branches = stmt
        .query_map(
            params![document_id.building_id, document_id.floor_id],
            branch_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(branches)
}

/// Move a branch head from `expected` to `new_head` if and only if the
/// stored head still equals `expected`. Returns the number of rows changed
/// (0 means the branch is missing or its head has moved).
pub fn compare_and_swap_head(
    conn: &Connection,
    branch_name: &str,
    document_id: &DocumentId,
    expected: &str,
    new_head: &str,
    status: BranchStatus,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE branches SET current_version_id = ?1, status = ?2, last_updated = ?3
         WHERE branch_name = ?4 AND building_id = ?5 AND floor_id = ?6
           AND current_version_id = ?7",
        params![
            new_head,
            status.as_str(),
            format_timestamp(&now()),
            branch_name,
            document_id.building_id,
            document_id.floor_id,
            expected,
        ],
    )?;
    debug!(branch = branch_name, expected, new_head, changed, "compare-and-swap head");
    Ok(changed)
}

/// Update a branch's status without touching its head.
pub fn set_branch_status(
    conn: &Connection,
    branch_name: &str,
    document_id: &DocumentId,
    status: BranchStatus,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE branches SET status = ?1, last_updated = ?2
         WHERE branch_name = ?3 AND building_id = ?4 AND floor_id = ?5",
        params![
            status.as_str(),
            format_timestamp(&now()),
            branch_name,
            document_id.building_id,
            document_id.floor_id,
        ],
    )?;
    Ok(changed)
}

// -- merge_requests ---------------------------------------------------------

const MERGE_COLUMNS: &str = "merge_id, source_branch, target_branch, building_id, floor_id,
     status, resolution_strategy, source_version_id, target_version_id, base_version_id,
     result_version_id, created_by, created_at, merged_by, merged_at, description";

fn merge_request_from_row(row: &Row<'_>) -> rusqlite::Result<MergeRequest> {
    Ok(MergeRequest {
        merge_id: row.get(0)?,
        source_branch: row.get(1)?,
        target_branch: row.get(2)?,
        document_id: DocumentId::new(row.get::<_, String>(3)?, row.get::<_, String>(4)?),
        status: enum_col(row, 5)?,
        conflicts: Vec::new(),
        resolution_strategy: row.get(6)?,
        source_version_id: row.get(7)?,
        target_version_id: row.get(8)?,
        base_version_id: row.get(9)?,
        result_version_id: row.get(10)?,
        created_by: row.get(11)?,
        created_at: ts_col(row, 12)?,
        merged_by: row.get(13)?,
        merged_at: opt_ts_col(row, 14)?,
        description: row.get(15)?,
    })
}

/// Insert a merge request row. Its conflicts are inserted separately.
pub fn insert_merge_request(conn: &Connection, mr: &MergeRequest) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO merge_requests (merge_id, source_branch, target_branch, building_id,
         floor_id, status, resolution_strategy, source_version_id, target_version_id,
         base_version_id, created_by, created_at, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            mr.merge_id,
            mr.source_branch,
            mr.target_branch,
            mr.document_id.building_id,
            mr.document_id.floor_id,
            mr.status.as_str(),
            mr.resolution_strategy,
            mr.source_version_id,
            mr.target_version_id,
            mr.base_version_id,
            mr.created_by,
            format_timestamp(&mr.created_at),
            mr.description,
        ],
    )?;
    debug!(merge_id = %mr.merge_id, status = %mr.status, "inserted merge request");
    Ok(())
}

fn conflict_ids(conn: &Connection, merge_id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT conflict_id FROM conflicts WHERE merge_id = ?1
         ORDER BY object_id, property_name, rowid",
    )?;
    let ids = stmt
        .query_map(params![merge_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Get a merge request, including the ids of its conflicts.
pub fn get_merge_request(
    conn: &Connection,
    merge_id: &str,
) -> Result<Option<MergeRequest>, DatabaseError> {
    let sql = format!("SELECT {MERGE_COLUMNS} FROM merge_requests WHERE merge_id = ?1");
    let Some(mut mr) = conn
        .query_row(&sql, params![merge_id], merge_request_from_row)
        .optional()?
    else {
        return Ok(None);
    };
    mr.conflicts = conflict_ids(conn, merge_id)?;
    Ok(Some(mr))
}

/// Merge requests of a document, newest first, optionally filtered by status.
pub fn list_merge_requests(
    conn: &Connection,
    document_id: &DocumentId,
    status: Option<MergeStatus>,
) -> Result<Vec<MergeRequest>, DatabaseError> {
    let sql = format!(
        "SELECT {MERGE_COLUMNS} FROM merge_requests
         WHERE building_id = ?1 AND floor_id = ?2 AND (?3 IS NULL OR status = ?3)
         ORDER BY id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut requests = stmt
        .query_map(
            params![
                document_id.building_id,
                document_id.floor_id,
                status.map(|s| s.as_str()),
            ],
            merge_request_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for mr in &mut requests {
        mr.conflicts = conflict_ids(conn, &mr.merge_id)?;
    }
    Ok(requests)
}

/// Mark a merge request completed.
pub fn complete_merge_request(
    conn: &Connection,
    merge_id: &str,
    merged_by: &str,
    result_version_id: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE merge_requests SET status = ?1, merged_by = ?2, merged_at = ?3,
         result_version_id = ?4
         WHERE merge_id = ?5",
        params![
            MergeStatus::Completed.as_str(),
            merged_by,
            format_timestamp(&now()),
            result_version_id,
            merge_id,
        ],
    )?;
    debug!(merge_id, merged_by, result_version_id, "completed merge request");
    Ok(changed)
}

/// Set the status of a merge request that is not yet terminal.
pub fn set_merge_status(
    conn: &Connection,
    merge_id: &str,
    status: MergeStatus,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE merge_requests SET status = ?1
         WHERE merge_id = ?2 AND status NOT IN ('completed', 'failed')",
        params![status.as_str(), merge_id],
    )?;
    Ok(changed)
}

// -- conflicts --------------------------------------------------------------

const CONFLICT_COLUMNS: &str = "conflict_id, merge_id, conflict_type, object_id, property_name,
     source_value, target_value, resolution, resolved_by, resolved_at, created_at";

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    Ok(Conflict {
        conflict_id: row.get(0)?,
        merge_id: row.get(1)?,
        conflict_type: enum_col(row, 2)?,
        object_id: row.get(3)?,
        property_name: row.get(4)?,
        source_value: json_value_col(row, 5)?,
        target_value: json_value_col(row, 6)?,
        resolution: row.get(7)?,
        resolved_by: row.get(8)?,
        resolved_at: opt_ts_col(row, 9)?,
        created_at: ts_col(row, 10)?,
    })
}

/// Insert a conflict record.
pub fn insert_conflict(conn: &Connection, conflict: &Conflict) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO conflicts (conflict_id, merge_id, conflict_type, object_id, property_name,
         source_value, target_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            conflict.conflict_id,
            conflict.merge_id,
            conflict.conflict_type.as_str(),
            conflict.object_id,
            conflict.property_name,
            json_text(conflict.source_value.as_ref()),
            json_text(conflict.target_value.as_ref()),
            format_timestamp(&conflict.created_at),
        ],
    )?;
    debug!(
        conflict_id = %conflict.conflict_id,
        object_id = %conflict.object_id,
        conflict_type = %conflict.conflict_type,
        "inserted conflict"
    );
    Ok(())
}

/// Get a conflict by id.
pub fn get_conflict(
    conn: &Connection,
    conflict_id: &str,
) -> Result<Option<Conflict>, DatabaseError> {
    let sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE conflict_id = ?1");
    let conflict = conn
        .query_row(&sql, params![conflict_id], conflict_from_row)
        .optional()?;
    Ok(conflict)
}

/// Conflicts of a merge request, ascending by object id then property.
pub fn list_conflicts(conn: &Connection, merge_id: &str) -> Result<Vec<Conflict>, DatabaseError> {
    let sql = format!(
        "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE merge_id = ?1
         ORDER BY object_id, property_name, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let conflicts = stmt
        .query_map(params![merge_id], conflict_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

/// Record a resolution on a conflict that has none yet. Returns the number
/// of rows changed (0 if the conflict is missing or already resolved).
pub fn resolve_conflict(
    conn: &Connection,
    conflict_id: &str,
    resolution: &str,
    resolved_by: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE conflicts SET resolution = ?1, resolved_by = ?2, resolved_at = ?3
         WHERE conflict_id = ?4 AND resolution IS NULL",
        params![resolution, resolved_by, format_timestamp(&now()), conflict_id],
    )?;
    debug!(conflict_id, resolution, changed, "resolved conflict");
    Ok(changed)
}

/// Count conflicts of a merge request that have no resolution.
pub fn count_unresolved(conn: &Connection, merge_id: &str) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conflicts WHERE merge_id = ?1 AND resolution IS NULL",
        params![merge_id],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

// -- annotations ------------------------------------------------------------

const ANNOTATION_COLUMNS: &str = "annotation_id, version_id, building_id, floor_id, object_id,
     position_x, position_y, annotation_type, title, content, author, created_at, updated_at";

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        annotation_id: row.get(0)?,
        version_id: row.get(1)?,
        document_id: DocumentId::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        object_id: row.get(4)?,
        position_x: row.get(5)?,
        position_y: row.get(6)?,
        annotation_type: row.get(7)?,
        title: row.get(8)?,
        content: row.get(9)?,
        author: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

/// Insert an annotation.
pub fn insert_annotation(conn: &Connection, annotation: &Annotation) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO annotations (annotation_id, version_id, building_id, floor_id, object_id,
         position_x, position_y, annotation_type, title, content, author, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            annotation.annotation_id,
            annotation.version_id,
            annotation.document_id.building_id,
            annotation.document_id.floor_id,
            annotation.object_id,
            annotation.position_x,
            annotation.position_y,
            annotation.annotation_type,
            annotation.title,
            annotation.content,
            annotation.author,
            format_timestamp(&annotation.created_at),
            format_timestamp(&annotation.updated_at),
        ],
    )?;
    debug!(
        annotation_id = %annotation.annotation_id,
        version_id = %annotation.version_id,
        "inserted annotation"
    );
    Ok(())
}

/// Whether an annotation with this id exists.
pub fn annotation_exists(conn: &Connection, annotation_id: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM annotations WHERE annotation_id = ?1",
        params![annotation_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Annotations of a version in creation order.
pub fn list_annotations(
    conn: &Connection,
    version_id: &str,
) -> Result<Vec<Annotation>, DatabaseError> {
    let sql = format!(
        "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE version_id = ?1
         ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let annotations = stmt
        .query_map(params![version_id], annotation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(annotations)
}

/// All annotations of a document, newest first.
pub fn list_document_annotations(
    conn: &Connection,
    document_id: &DocumentId,
) -> Result<Vec<Annotation>, DatabaseError> {
    let sql = format!(
        "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE building_id = ?1 AND floor_id = ?2
         ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let annotations = stmt
        .query_map(
            params![document_id.building_id, document_id.floor_id],
            annotation_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(annotations)
}

// -- comments ---------------------------------------------------------------

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        comment_id: row.get(0)?,
        parent_id: row.get(1)?,
        parent_type: enum_col(row, 2)?,
        author: row.get(3)?,
        content: row.get(4)?,
        created_at: ts_col(row, 5)?,
        updated_at: ts_col(row, 6)?,
    })
}

/// Insert a comment.
pub fn insert_comment(conn: &Connection, comment: &Comment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO comments (comment_id, parent_id, parent_type, author, content,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            comment.comment_id,
            comment.parent_id,
            comment.parent_type.as_str(),
            comment.author,
            comment.content,
            format_timestamp(&comment.created_at),
            format_timestamp(&comment.updated_at),
        ],
    )?;
    debug!(comment_id = %comment.comment_id, parent_id = %comment.parent_id, "inserted comment");
    Ok(())
}

/// Comments on one parent in creation order.
pub fn list_comments(
    conn: &Connection,
    parent_id: &str,
    parent_type: ParentType,
) -> Result<Vec<Comment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT comment_id, parent_id, parent_type, author, content, created_at, updated_at
         FROM comments WHERE parent_id = ?1 AND parent_type = ?2
         ORDER BY created_at, rowid",
    )?;
    let comments = stmt
        .query_map(params![parent_id, parent_type.as_str()], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ConflictType, VersionType};
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn doc() -> DocumentId {
        DocumentId::new("hq", "l1")
    }

    fn version(id: &str, branch: &str, seq: i64, parent: Option<&str>) -> Version {
        Version {
            version_id: id.to_string(),
            document_id: doc(),
            branch_name: branch.to_string(),
            parent_version_id: parent.map(str::to_string),
            version_type: VersionType::Minor,
            version_number: format!("{branch}-minor-20250101.000000"),
            branch_seq: seq,
            commit_message: "msg".into(),
            author: "ann".into(),
            created_at: now(),
            content_hash: "abc".into(),
            content_size: 2,
            metadata: Map::new(),
        }
    }

    fn branch(name: &str, head: &str) -> Branch {
        Branch {
            branch_name: name.to_string(),
            document_id: doc(),
            base_version_id: head.to_string(),
            current_version_id: head.to_string(),
            status: BranchStatus::Active,
            created_by: "ann".into(),
            created_at: now(),
            last_updated: now(),
            description: String::new(),
        }
    }

    #[test]
    fn test_version_crud_and_history_order() {
        let db = setup_db();
        let conn = db.conn();
        insert_version(&conn, &version("v1", "main", 1, None)).unwrap();
        insert_version(&conn, &version("v2", "main", 2, Some("v1"))).unwrap();
        insert_version(&conn, &version("v3", "feat", 1, Some("v1"))).unwrap();

        let v2 = get_version(&conn, "v2").unwrap().unwrap();
        assert_eq!(v2.parent_version_id.as_deref(), Some("v1"));
        assert_eq!(v2.document_id, doc());
        assert!(get_version(&conn, "nope").unwrap().is_none());

        let all: Vec<_> = list_versions(&conn, &doc(), None)
            .unwrap()
            .into_iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(all, vec!["v3", "v2", "v1"]);

        let main: Vec<_> = list_versions(&conn, &doc(), Some("main"))
            .unwrap()
            .into_iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(main, vec!["v2", "v1"]);

        assert_eq!(next_branch_seq(&conn, &doc(), "main").unwrap(), 3);
        assert_eq!(next_branch_seq(&conn, &doc(), "other").unwrap(), 1);
        assert_eq!(get_parent_id(&conn, "v1").unwrap(), Some(None));
        assert_eq!(get_parent_id(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn test_compare_and_swap_head() {
        let db = setup_db();
        let conn = db.conn();
        insert_version(&conn, &version("v1", "main", 1, None)).unwrap();
        insert_version(&conn, &version("v2", "main", 2, Some("v1"))).unwrap();
        insert_branch(&conn, &branch("main", "v1")).unwrap();

        let changed =
            compare_and_swap_head(&conn, "main", &doc(), "v1", "v2", BranchStatus::Active)
                .unwrap();
        assert_eq!(changed, 1);

        let stale =
            compare_and_swap_head(&conn, "main", &doc(), "v1", "v2", BranchStatus::Active)
                .unwrap();
        assert_eq!(stale, 0);

        let head = get_branch(&conn, "main", &doc()).unwrap().unwrap();
        assert_eq!(head.current_version_id, "v2");
        assert_eq!(head.base_version_id, "v1");
    }

    #[test]
    fn test_conflict_resolution_is_written_once() {
        let db = setup_db();
        let conn = db.conn();
        insert_version(&conn, &version("v1", "main", 1, None)).unwrap();
        let mr = MergeRequest {
            merge_id: "m1".into(),
            source_branch: "feat".into(),
            target_branch: "main".into(),
            document_id: doc(),
            status: MergeStatus::Conflict,
            conflicts: Vec::new(),
            resolution_strategy: "materialize".into(),
            source_version_id: "v1".into(),
            target_version_id: "v1".into(),
            base_version_id: None,
            result_version_id: None,
            created_by: "ann".into(),
            created_at: now(),
            merged_by: None,
            merged_at: None,
            description: String::new(),
        };
        insert_merge_request(&conn, &mr).unwrap();
        insert_conflict(
            &conn,
            &Conflict {
                conflict_id: "c1".into(),
                merge_id: "m1".into(),
                conflict_type: ConflictType::ObjectModified,
                object_id: "r1".into(),
                property_name: None,
                source_value: Some(json!({"id": "r1", "x": 2})),
                target_value: Some(json!({"id": "r1", "x": 1})),
                resolution: None,
                resolved_by: None,
                resolved_at: None,
                created_at: now(),
            },
        )
        .unwrap();

        assert_eq!(count_unresolved(&conn, "m1").unwrap(), 1);
        assert_eq!(resolve_conflict(&conn, "c1", "source_wins", "bob").unwrap(), 1);
        assert_eq!(resolve_conflict(&conn, "c1", "target_wins", "bob").unwrap(), 0);
        assert_eq!(count_unresolved(&conn, "m1").unwrap(), 0);

        let c = get_conflict(&conn, "c1").unwrap().unwrap();
        assert_eq!(c.resolution.as_deref(), Some("source_wins"));
        assert_eq!(c.source_value.unwrap()["x"], 2);

        let loaded = get_merge_request(&conn, "m1").unwrap().unwrap();
        assert_eq!(loaded.conflicts, vec!["c1".to_string()]);
    }

    #[test]
    fn test_comments_in_creation_order() {
        let db = setup_db();
        let conn = db.conn();
        for (i, text) in ["first", "second"].iter().enumerate() {
            insert_comment(
                &conn,
                &Comment {
                    comment_id: format!("c{i}"),
                    parent_id: "v1".into(),
                    parent_type: ParentType::Version,
                    author: "ann".into(),
                    content: text.to_string(),
                    created_at: now(),
                    updated_at: now(),
                },
            )
            .unwrap();
        }
        let comments = list_comments(&conn, "v1", ParentType::Version).unwrap();
        let texts: Vec<_> = comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(list_comments(&conn, "v1", ParentType::Annotation)
            .unwrap()
            .is_empty());
    }
}
