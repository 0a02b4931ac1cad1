use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::Team;
use crate::db::DbPool;
use crate::error::AppError;

// ============================================================================
// Row mappers
// ============================================================================

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_team(row: &Row) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get("id")?,
        work_item_id: row.get("work_item_id")?,
        leader_id: row.get("leader_id")?,
        members: json_column(row, "members")?,
        messages: json_column(row, "messages")?,
        version: row.get("version")?,
        last_activity: row.get("last_activity")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// Reads
// ============================================================================

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<Team, AppError> {
    let conn = pool.get()?;
    load(&conn, id)
}

pub fn load(conn: &Connection, id: &str) -> Result<Team, AppError> {
    conn.query_row("SELECT * FROM teams WHERE id = ?1", params![id], row_to_team)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Team {id}")),
            other => AppError::Database(other),
        })
}

pub fn find_by_work_item(conn: &Connection, work_item_id: &str) -> Result<Option<Team>, AppError> {
    Ok(conn
        .query_row(
            "SELECT * FROM teams WHERE work_item_id = ?1",
            params![work_item_id],
            row_to_team,
        )
        .optional()?)
}

// ============================================================================
// Writes
// ============================================================================

pub fn insert(conn: &Connection, team: &Team) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO teams
         (id, work_item_id, leader_id, members, messages, version, last_activity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            team.id,
            team.work_item_id,
            team.leader_id,
            serde_json::to_string(&team.members)?,
            serde_json::to_string(&team.messages)?,
            team.version,
            team.last_activity,
            team.created_at,
        ],
    )?;
    Ok(())
}

/// Compare-and-swap on `version`, same contract as the work item save.
pub fn save(conn: &Connection, team: &mut Team) -> Result<(), AppError> {
    let rows = conn.execute(
        "UPDATE teams
         SET members = ?1, messages = ?2, version = version + 1, last_activity = ?3
         WHERE id = ?4 AND version = ?5",
        params![
            serde_json::to_string(&team.members)?,
            serde_json::to_string(&team.messages)?,
            team.last_activity,
            team.id,
            team.version,
        ],
    )?;

    if rows == 0 {
        let exists: bool = conn
            .query_row("SELECT 1 FROM teams WHERE id = ?1", params![team.id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        return Err(if exists {
            AppError::Transient(format!("Team {} was modified concurrently", team.id))
        } else {
            AppError::NotFound(format!("Team {}", team.id))
        });
    }

    team.version += 1;
    Ok(())
}
