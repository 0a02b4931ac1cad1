use rusqlite::Connection;

use crate::error::AppError;

/// Run the schema migration. Idempotent.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Work Items
-- Applications, submissions, ratings and the selected roster are embedded
-- in `children` (JSON) and always written together with the scalar fields.
-- ============================================================================

CREATE TABLE IF NOT EXISTS work_items (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    deadline    TEXT,
    status      TEXT NOT NULL DEFAULT 'open'
                CHECK(status IN ('open','closed','assigned','in-progress','modify','completed','cancelled')),
    team_id     TEXT,
    children    TEXT NOT NULL DEFAULT '{}',
    version     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_items_owner  ON work_items(owner_id);
CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);

-- ============================================================================
-- Teams
-- One per work item. Members and the message log are embedded as JSON.
-- ============================================================================

CREATE TABLE IF NOT EXISTS teams (
    id            TEXT PRIMARY KEY,
    work_item_id  TEXT NOT NULL UNIQUE REFERENCES work_items(id) ON DELETE CASCADE,
    leader_id     TEXT NOT NULL,
    members       TEXT NOT NULL DEFAULT '[]',
    messages      TEXT NOT NULL DEFAULT '[]',
    version       INTEGER NOT NULL DEFAULT 0,
    last_activity TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

"#;
