use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{CreateWorkItemInput, WorkItem, WorkItemChildren, WorkItemStatus};
use crate::db::DbPool;
use crate::error::AppError;

// ============================================================================
// Row mappers
// ============================================================================

fn row_to_work_item(row: &Row) -> rusqlite::Result<WorkItem> {
    let children_json: String = row.get("children")?;
    let children: WorkItemChildren = serde_json::from_str(&children_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(WorkItem {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        deadline: row.get("deadline")?,
        status: row.get("status")?,
        team_id: row.get("team_id")?,
        selected: children.selected,
        applications: children.applications,
        submissions: children.submissions,
        ratings: children.ratings,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn not_found(id: &str) -> impl FnOnce(rusqlite::Error) -> AppError + '_ {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Work item {id}")),
        other => AppError::Database(other),
    }
}

// ============================================================================
// Reads
// ============================================================================

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<WorkItem, AppError> {
    let conn = pool.get()?;
    load(&conn, id)
}

/// Load inside an open connection or transaction.
pub fn load(conn: &Connection, id: &str) -> Result<WorkItem, AppError> {
    conn.query_row(
        "SELECT * FROM work_items WHERE id = ?1",
        params![id],
        row_to_work_item,
    )
    .map_err(not_found(id))
}

pub fn find(conn: &Connection, id: &str) -> Result<Option<WorkItem>, AppError> {
    Ok(conn
        .query_row(
            "SELECT * FROM work_items WHERE id = ?1",
            params![id],
            row_to_work_item,
        )
        .optional()?)
}

// ============================================================================
// Writes
// ============================================================================

pub fn create(pool: &DbPool, owner_id: &str, input: CreateWorkItemInput) -> Result<WorkItem, AppError> {
    let conn = pool.get()?;
    let item = WorkItem {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        title: input.title.trim().to_string(),
        description: input.description.unwrap_or_default(),
        deadline: input.deadline,
        status: WorkItemStatus::Open,
        team_id: None,
        selected: Vec::new(),
        applications: Vec::new(),
        submissions: Vec::new(),
        ratings: Vec::new(),
        version: 0,
        created_at: chrono::Utc::now().to_rfc3339(),
        updated_at: chrono::Utc::now().to_rfc3339(),
    };

    conn.execute(
        "INSERT INTO work_items
         (id, owner_id, title, description, deadline, status, team_id, children, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, 0, ?8, ?9)",
        params![
            item.id,
            item.owner_id,
            item.title,
            item.description,
            item.deadline,
            item.status,
            serde_json::to_string(&item.children())?,
            item.created_at,
            item.updated_at,
        ],
    )?;

    Ok(item)
}

/// Write the whole aggregate back if nobody else wrote it since it was
/// loaded. Bumps `version` and `updated_at` on success.
pub fn save(conn: &Connection, item: &mut WorkItem) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE work_items
         SET title = ?1, description = ?2, deadline = ?3, status = ?4, team_id = ?5,
             children = ?6, version = version + 1, updated_at = ?7
         WHERE id = ?8 AND version = ?9",
        params![
            item.title,
            item.description,
            item.deadline,
            item.status,
            item.team_id,
            serde_json::to_string(&item.children())?,
            now,
            item.id,
            item.version,
        ],
    )?;

    if rows == 0 {
        return match find(conn, &item.id)? {
            Some(_) => Err(AppError::Transient(format!(
                "Work item {} was modified concurrently",
                item.id
            ))),
            None => Err(AppError::NotFound(format!("Work item {}", item.id))),
        };
    }

    item.version += 1;
    item.updated_at = now;
    Ok(())
}
