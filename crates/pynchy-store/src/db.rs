use rusqlite::Connection;

use crate::error::Result;

/// Initialise every table in the state store and run forward migrations.
///
/// Safe to call on every boot: table/index creation is `IF NOT EXISTS`, and
/// columns added by later revisions of this schema are backfilled with
/// `ALTER TABLE ... ADD COLUMN` guarded by a catalog probe, matching §3's
/// "migrate forward by ALTER TABLE ADD COLUMN of missing columns at boot".
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            jid               TEXT PRIMARY KEY,
            name              TEXT,
            last_message_time TEXT,
            cleared_at        TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id            TEXT NOT NULL,
            chat_jid      TEXT NOT NULL,
            sender        TEXT NOT NULL,
            sender_name   TEXT,
            content       TEXT NOT NULL,
            timestamp     TEXT NOT NULL,
            is_from_me    INTEGER NOT NULL DEFAULT 0,
            message_type  TEXT NOT NULL DEFAULT 'user',
            metadata      TEXT,
            PRIMARY KEY (id, chat_jid)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
            ON messages(chat_jid, timestamp, id);
        CREATE INDEX IF NOT EXISTS idx_messages_ts
            ON messages(timestamp, id);

        CREATE TABLE IF NOT EXISTS workspaces (
            jid               TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            folder            TEXT NOT NULL UNIQUE,
            trigger           TEXT NOT NULL DEFAULT 'mention',
            is_admin          INTEGER NOT NULL DEFAULT 0,
            security_profile  TEXT NOT NULL DEFAULT '{}',
            added_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            group_folder TEXT PRIMARY KEY,
            session_id   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id             TEXT PRIMARY KEY,
            group_folder   TEXT NOT NULL,
            chat_jid       TEXT NOT NULL,
            prompt         TEXT NOT NULL,
            schedule_type  TEXT NOT NULL,
            schedule_value TEXT NOT NULL,
            next_run       TEXT,
            last_run       TEXT,
            last_result    TEXT,
            status         TEXT NOT NULL DEFAULT 'active',
            context_mode   TEXT NOT NULL DEFAULT 'group',
            repo_access    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
            ON scheduled_tasks(status, next_run);

        CREATE TABLE IF NOT EXISTS task_runs (
            task_id     TEXT NOT NULL,
            run_at      TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            status      TEXT NOT NULL,
            result      TEXT,
            error       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_task_runs_task
            ON task_runs(task_id, run_at DESC);

        CREATE TABLE IF NOT EXISTS host_jobs (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            schedule        TEXT NOT NULL,
            command         TEXT NOT NULL,
            cwd             TEXT,
            timeout_seconds INTEGER NOT NULL DEFAULT 300,
            enabled         INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS jid_aliases (
            alias_jid     TEXT PRIMARY KEY,
            canonical_jid TEXT NOT NULL,
            channel_name  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jid_aliases_canonical
            ON jid_aliases(canonical_jid);

        CREATE TABLE IF NOT EXISTS channel_cursors (
            channel_name TEXT NOT NULL,
            chat_jid     TEXT NOT NULL,
            direction    TEXT NOT NULL,
            cursor_value TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (channel_name, chat_jid, direction)
        );

        CREATE TABLE IF NOT EXISTS outbound_ledger (
            id        TEXT PRIMARY KEY,
            chat_jid  TEXT NOT NULL,
            content   TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            source    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbound_ledger_chat
            ON outbound_ledger(chat_jid, timestamp);

        CREATE TABLE IF NOT EXISTS outbound_deliveries (
            ledger_id    TEXT NOT NULL,
            channel_name TEXT NOT NULL,
            delivered_at TEXT,
            error        TEXT,
            PRIMARY KEY (ledger_id, channel_name)
        );
        CREATE INDEX IF NOT EXISTS idx_outbound_deliveries_pending
            ON outbound_deliveries(delivered_at);

        CREATE TABLE IF NOT EXISTS router_state (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plugin_verification_cache (
            plugin_name TEXT NOT NULL,
            git_sha     TEXT NOT NULL,
            verdict     TEXT NOT NULL,
            reasoning   TEXT NOT NULL,
            verified_at TEXT NOT NULL,
            PRIMARY KEY (plugin_name, git_sha)
        );
        ",
    )?;

    migrate_add_columns(conn)?;
    Ok(())
}

/// Additive, idempotent column migrations for installs created before a
/// column existed. Each probes `PRAGMA table_info` first so re-running at
/// every boot is a no-op once applied.
fn migrate_add_columns(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "workspaces", "idle_terminate_ms", "INTEGER")?;
    add_column_if_missing(conn, "scheduled_tasks", "created_at", "TEXT")?;
    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();
    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"),
            [],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
