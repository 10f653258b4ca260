//! Tag ledger linking stored objects to analyses and project tags.
//!
//! The object store only knows opaque keys. This crate keeps the relational
//! side: which analysis (`client_id`) owns an object, under which filename,
//! and which project-scoped tags point at it.
//!
//! Every write is a create-if-absent inside one transaction. Concurrent
//! taggers are arbitrated by the UNIQUE constraints from `tessera-db`, never
//! by an application-level read-then-write, so the loser of a race over the
//! same `(object_id, client_id)` sees [`LedgerError::FilenameConflict`].

mod grammar;

pub use grammar::{is_valid_tag, MAX_TAG_LEN};

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

/// Filename recorded when a tagging request does not name one.
pub const DEFAULT_FILENAME: &str = "data.bin";

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid tag `{0}`")]
    InvalidTag(String),

    /// The object is already recorded for this analysis under another name.
    #[error(
        "the object ID {object_id} is already persisted for analysis {client_id}, \
         but with a different filename than {filename}"
    )]
    FilenameConflict {
        object_id: String,
        client_id: String,
        filename: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A stored object as seen by one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredResult {
    /// Internal database ID.
    pub id: i64,
    /// Object identifier in the object store.
    pub object_id: String,
    /// Owning analysis.
    pub client_id: String,
    /// Display name.
    pub filename: String,
    /// Creation timestamp (SQLite `datetime('now')`, UTC).
    pub created_at: String,
}

/// A project-scoped tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub tag_name: String,
    pub project_id: String,
    pub created_at: String,
}

/// Parameters for [`tag_object`].
#[derive(Debug, Clone)]
pub struct TagRequest {
    pub tag_name: String,
    pub project_id: String,
    pub client_id: String,
    pub object_id: String,
    /// Falls back to [`DEFAULT_FILENAME`] when absent.
    pub filename: Option<String>,
}

impl TagRequest {
    /// The filename that will be recorded for this request.
    pub fn effective_filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(DEFAULT_FILENAME)
    }
}

/// Row counts removed by [`purge_project`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub results_deleted: usize,
    pub tags_deleted: usize,
}

/// Tags an object, creating the result, tag and link rows as needed.
///
/// Repeating an identical request is a no-op. The three steps share one
/// IMMEDIATE transaction, so a failure part-way leaves nothing behind.
///
/// # Errors
///
/// - `InvalidTag` if the tag fails the grammar; nothing is touched.
/// - `FilenameConflict` if the object is already recorded for this client
///   with a different filename; the existing row is left unchanged.
pub fn tag_object(conn: &mut Connection, request: &TagRequest) -> Result<StoredResult, LedgerError> {
    if !is_valid_tag(&request.tag_name) {
        return Err(LedgerError::InvalidTag(request.tag_name.clone()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let result = ensure_result(
        &tx,
        &request.object_id,
        &request.client_id,
        request.effective_filename(),
    )?;
    let tag_id = ensure_tag(&tx, &request.tag_name, &request.project_id)?;

    tx.execute(
        "INSERT INTO tagged_results (tag_id, result_id) VALUES (?1, ?2)
         ON CONFLICT (tag_id, result_id) DO NOTHING",
        params![tag_id, result.id],
    )?;

    tx.commit()?;

    tracing::debug!(
        tag = %request.tag_name,
        project_id = %request.project_id,
        object_id = %request.object_id,
        "tagged object"
    );

    Ok(result)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Inserts the result row; on a uniqueness rejection the existing row is
/// accepted only if it carries the requested filename.
fn ensure_result(
    conn: &Connection,
    object_id: &str,
    client_id: &str,
    filename: &str,
) -> Result<StoredResult, LedgerError> {
    match conn.execute(
        "INSERT INTO results (object_id, client_id, filename) VALUES (?1, ?2, ?3)",
        params![object_id, client_id, filename],
    ) {
        Ok(_) => {
            let id = conn.last_insert_rowid();
            Ok(conn.query_row(
                "SELECT id, object_id, client_id, filename, created_at
                 FROM results WHERE id = ?1",
                [id],
                map_row_to_result,
            )?)
        }
        Err(e) if is_unique_violation(&e) => conn
            .query_row(
                "SELECT id, object_id, client_id, filename, created_at
                 FROM results
                 WHERE object_id = ?1 AND client_id = ?2 AND filename = ?3",
                params![object_id, client_id, filename],
                map_row_to_result,
            )
            .optional()?
            .ok_or_else(|| LedgerError::FilenameConflict {
                object_id: object_id.to_string(),
                client_id: client_id.to_string(),
                filename: filename.to_string(),
            }),
        Err(e) => Err(e.into()),
    }
}

fn ensure_tag(conn: &Connection, tag_name: &str, project_id: &str) -> Result<i64, LedgerError> {
    conn.execute(
        "INSERT INTO tags (tag_name, project_id) VALUES (?1, ?2)
         ON CONFLICT (tag_name, project_id) DO NOTHING",
        params![tag_name, project_id],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM tags WHERE tag_name = ?1 AND project_id = ?2",
        params![tag_name, project_id],
        |row| row.get(0),
    )?)
}

/// Lists all tags of a project, ordered by name.
pub fn list_tags(conn: &Connection, project_id: &str) -> Result<Vec<Tag>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, tag_name, project_id, created_at
         FROM tags WHERE project_id = ?1 ORDER BY tag_name ASC",
    )?;

    let rows = stmt.query_map([project_id], map_row_to_tag)?;
    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

/// Lists the results carrying `tag_name` within a project.
pub fn list_tagged_results(
    conn: &Connection,
    project_id: &str,
    tag_name: &str,
) -> Result<Vec<StoredResult>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.object_id, r.client_id, r.filename, r.created_at
         FROM results r
         JOIN tagged_results tr ON tr.result_id = r.id
         JOIN tags t ON t.id = tr.tag_id
         WHERE t.project_id = ?1 AND t.tag_name = ?2
         ORDER BY r.id ASC",
    )?;

    let rows = stmt.query_map(params![project_id, tag_name], map_row_to_result)?;
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Looks up the result row of an object for one analysis.
pub fn find_result(
    conn: &Connection,
    object_id: &str,
    client_id: &str,
) -> Result<Option<StoredResult>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT id, object_id, client_id, filename, created_at
             FROM results WHERE object_id = ?1 AND client_id = ?2",
            params![object_id, client_id],
            map_row_to_result,
        )
        .optional()?)
}

/// Removes the ledger rows of a deleted project.
///
/// Deletes every result whose object id is in `object_ids` and every tag of
/// the project; links cascade. Callers remove the object bytes first, so an
/// interruption between the two steps leaves orphaned objects at worst,
/// never ledger rows for bytes that were kept.
pub fn purge_project(
    conn: &mut Connection,
    project_id: &str,
    object_ids: &[String],
) -> Result<PurgeSummary, LedgerError> {
    let tx = conn.transaction()?;
    let mut summary = PurgeSummary::default();

    {
        let mut stmt = tx.prepare("DELETE FROM results WHERE object_id = ?1")?;
        for object_id in object_ids {
            summary.results_deleted += stmt.execute([object_id])?;
        }
    }

    summary.tags_deleted = tx.execute("DELETE FROM tags WHERE project_id = ?1", [project_id])?;
    tx.commit()?;

    tracing::info!(
        project_id,
        results = summary.results_deleted,
        tags = summary.tags_deleted,
        "purged project ledger rows"
    );

    Ok(summary)
}

fn map_row_to_result(row: &Row) -> rusqlite::Result<StoredResult> {
    Ok(StoredResult {
        id: row.get(0)?,
        object_id: row.get(1)?,
        client_id: row.get(2)?,
        filename: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        tag_name: row.get(1)?,
        project_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}
