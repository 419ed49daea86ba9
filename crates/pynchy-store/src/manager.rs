use std::collections::HashMap;
use std::sync::Mutex;

use pynchy_core::types::{ChatJid, MessageType, Timestamp, WorkspaceFolder};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::db;
use crate::error::{Result, StoreError};
use crate::types::{
    parse_rfc3339, rfc3339, Chat, ContextMode, Delivery, HostJob, JidAlias, LedgerEntry, Message,
    PluginVerdict, PluginVerification, RouterState, ScheduleType, ScheduledTask, TaskRun,
    TaskStatus, Workspace,
};

/// The durable state store (§3). Wraps a single SQLite connection behind a
/// `Mutex` — the per-workspace queue is the real serialization point for
/// workspace-scoped work, so a single connection is sufficient for a
/// single-node host (mirrors every `skynet-*` manager's `db.rs` pattern).
pub struct StateStore {
    db: Mutex<Connection>,
}

impl StateStore {
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    // -- Chats ------------------------------------------------------------

    /// Ensure a chat row exists and bump `last_message_time`. Creates the
    /// row on first inbound message; a chat is never deleted afterwards.
    #[instrument(skip(self), fields(jid = %jid))]
    pub fn touch_chat(&self, jid: &ChatJid, name: Option<&str>, ts: Timestamp) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chats (jid, name, last_message_time, cleared_at)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(jid) DO UPDATE SET
               name = COALESCE(excluded.name, chats.name),
               last_message_time = excluded.last_message_time",
            params![jid.as_str(), name, rfc3339(&ts)],
        )?;
        Ok(())
    }

    /// Mark a chat cleared (context-reset §4.1) — its history remains in
    /// `messages` but is no longer surfaced to a freshly cold-started agent.
    #[instrument(skip(self), fields(jid = %jid))]
    pub fn clear_chat(&self, jid: &ChatJid, ts: Timestamp) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE chats SET cleared_at = ?1 WHERE jid = ?2",
            params![rfc3339(&ts), jid.as_str()],
        )?;
        Ok(())
    }

    pub fn get_chat(&self, jid: &ChatJid) -> Result<Option<Chat>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT jid, name, last_message_time, cleared_at FROM chats WHERE jid = ?1",
            params![jid.as_str()],
            row_to_chat,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // -- Messages -----------------------------------------------------------

    #[instrument(skip(self, msg), fields(chat_jid = %msg.chat_jid, id = %msg.id))]
    pub fn store_message(&self, msg: &Message) -> Result<()> {
        let db = self.db.lock().unwrap();
        let metadata = msg
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        db.execute(
            "INSERT OR REPLACE INTO messages
             (id, chat_jid, sender, sender_name, content, timestamp, is_from_me, message_type, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.id,
                msg.chat_jid.as_str(),
                msg.sender,
                msg.sender_name,
                msg.content,
                rfc3339(&msg.timestamp),
                msg.is_from_me as i64,
                msg.message_type.to_string(),
                metadata,
            ],
        )?;
        Ok(())
    }

    /// All messages with `timestamp > after` across every chat, ordered by
    /// `(timestamp, id)` — the router's global poll query (§4.1 step 1).
    pub fn messages_since(&self, after: Option<Timestamp>) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let after_str = after.map(|t| rfc3339(&t)).unwrap_or_default();
        let mut stmt = db.prepare(
            "SELECT id, chat_jid, sender, sender_name, content, timestamp, is_from_me, message_type, metadata
             FROM messages WHERE timestamp > ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![after_str], row_to_message)?;
        collect_rows(rows)
    }

    /// Messages for one chat newer than `after`, in `(timestamp, id)` order —
    /// used by the routing decision's "load pending" step.
    pub fn messages_for_chat_since(
        &self,
        jid: &ChatJid,
        after: Option<Timestamp>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let after_str = after.map(|t| rfc3339(&t)).unwrap_or_default();
        let mut stmt = db.prepare(
            "SELECT id, chat_jid, sender, sender_name, content, timestamp, is_from_me, message_type, metadata
             FROM messages WHERE chat_jid = ?1 AND timestamp > ?2 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![jid.as_str(), after_str], row_to_message)?;
        collect_rows(rows)
    }

    /// Most recent `limit` messages for one chat, returned oldest-first —
    /// `GET /api/messages?jid=&limit=`'s backing query.
    pub fn recent_messages_for_chat(&self, jid: &ChatJid, limit: i64) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_jid, sender, sender_name, content, timestamp, is_from_me, message_type, metadata
             FROM messages WHERE chat_jid = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![jid.as_str(), limit], row_to_message)?;
        let mut messages = collect_rows(rows)?;
        messages.reverse();
        Ok(messages)
    }

    // -- Workspaces -----------------------------------------------------------

    #[instrument(skip(self, ws), fields(folder = %ws.folder))]
    pub fn upsert_workspace(&self, ws: &Workspace) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO workspaces (jid, name, folder, trigger, is_admin, security_profile, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(jid) DO UPDATE SET
               name = excluded.name,
               folder = excluded.folder,
               trigger = excluded.trigger,
               is_admin = excluded.is_admin,
               security_profile = excluded.security_profile",
            params![
                ws.jid.as_str(),
                ws.name,
                ws.folder.as_str(),
                ws.trigger,
                ws.is_admin as i64,
                ws.security_profile.to_string(),
                rfc3339(&ws.added_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_workspace_by_jid(&self, jid: &ChatJid) -> Result<Option<Workspace>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT jid, name, folder, trigger, is_admin, security_profile, added_at
             FROM workspaces WHERE jid = ?1",
            params![jid.as_str()],
            row_to_workspace,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_workspace_by_folder(&self, folder: &WorkspaceFolder) -> Result<Option<Workspace>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT jid, name, folder, trigger, is_admin, security_profile, added_at
             FROM workspaces WHERE folder = ?1",
            params![folder.as_str()],
            row_to_workspace,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT jid, name, folder, trigger, is_admin, security_profile, added_at FROM workspaces",
        )?;
        let rows = stmt.query_map([], row_to_workspace)?;
        collect_rows(rows)
    }

    /// Unregisters a workspace whose folder no longer appears in config
    /// (§4.9 phase 4 "unregister orphans"). Leaves messages/ledger history
    /// in place; only the profile row is removed.
    pub fn delete_workspace(&self, folder: &WorkspaceFolder) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM workspaces WHERE folder = ?1", params![folder.as_str()])?;
        Ok(())
    }

    // -- Sessions -------------------------------------------------------------

    pub fn get_session_id(&self, folder: &WorkspaceFolder) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT session_id FROM sessions WHERE group_folder = ?1",
            params![folder.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    #[instrument(skip(self), fields(folder = %folder))]
    pub fn set_session_id(&self, folder: &WorkspaceFolder, session_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (group_folder, session_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(group_folder) DO UPDATE SET
               session_id = excluded.session_id, updated_at = excluded.updated_at",
            params![folder.as_str(), session_id, rfc3339(&pynchy_core::types::now())],
        )?;
        Ok(())
    }

    /// Explicit reset or graceful end (§3 Session lifecycle).
    #[instrument(skip(self), fields(folder = %folder))]
    pub fn clear_session(&self, folder: &WorkspaceFolder) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM sessions WHERE group_folder = ?1",
            params![folder.as_str()],
        )?;
        Ok(())
    }

    // -- Scheduled tasks --------------------------------------------------------

    #[instrument(skip(self, task), fields(id = %task.id))]
    pub fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO scheduled_tasks
             (id, group_folder, chat_jid, prompt, schedule_type, schedule_value,
              next_run, last_run, last_result, status, context_mode, repo_access, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                task.id,
                task.group_folder.as_str(),
                task.chat_jid.as_str(),
                task.prompt,
                task.schedule_type.as_str(),
                task.schedule_value,
                task.next_run.map(|t| rfc3339(&t)),
                task.last_run.map(|t| rfc3339(&t)),
                task.last_result,
                task.status.as_str(),
                task.context_mode.as_str(),
                task.repo_access,
                rfc3339(&pynchy_core::types::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, group_folder, chat_jid, prompt, schedule_type, schedule_value,
                    next_run, last_run, last_result, status, context_mode, repo_access
             FROM scheduled_tasks WHERE id = ?1",
            params![id],
            row_to_task,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Tasks due to run: `status = active AND next_run <= now` (§4.7 step 1).
    pub fn due_tasks(&self, now: Timestamp) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, group_folder, chat_jid, prompt, schedule_type, schedule_value,
                    next_run, last_run, last_result, status, context_mode, repo_access
             FROM scheduled_tasks
             WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1",
        )?;
        let rows = stmt.query_map(params![rfc3339(&now)], row_to_task)?;
        collect_rows(rows)
    }

    pub fn list_tasks_for_workspace(&self, folder: &WorkspaceFolder) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, group_folder, chat_jid, prompt, schedule_type, schedule_value,
                    next_run, last_run, last_result, status, context_mode, repo_access
             FROM scheduled_tasks WHERE group_folder = ?1",
        )?;
        let rows = stmt.query_map(params![folder.as_str()], row_to_task)?;
        collect_rows(rows)
    }

    #[instrument(skip(self, result), fields(id))]
    pub fn update_task_after_run(
        &self,
        id: &str,
        next_run: Option<Timestamp>,
        last_run: Timestamp,
        result: &str,
        status: TaskStatus,
    ) -> Result<()> {
        // 200-char result summary cap, per §4.7 step 5.
        let truncated: String = result.chars().take(200).collect();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE scheduled_tasks
             SET next_run = ?1, last_run = ?2, last_result = ?3, status = ?4
             WHERE id = ?5",
            params![
                next_run.map(|t| rfc3339(&t)),
                rfc3339(&last_run),
                truncated,
                status.as_str(),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE scheduled_tasks SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    // -- Task run log ------------------------------------------------------------

    pub fn append_task_run(&self, run: &TaskRun) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_runs (task_id, run_at, duration_ms, status, result, error)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                run.task_id,
                rfc3339(&run.run_at),
                run.duration_ms,
                run.status,
                run.result,
                run.error,
            ],
        )?;
        Ok(())
    }

    // -- Host jobs -----------------------------------------------------------------

    pub fn list_host_jobs(&self) -> Result<Vec<HostJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, schedule, command, cwd, timeout_seconds, enabled FROM host_jobs",
        )?;
        let rows = stmt.query_map([], row_to_host_job)?;
        collect_rows(rows)
    }

    pub fn upsert_host_job(&self, job: &HostJob) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO host_jobs (id, name, schedule, command, cwd, timeout_seconds, enabled)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name, schedule = excluded.schedule, command = excluded.command,
               cwd = excluded.cwd, timeout_seconds = excluded.timeout_seconds, enabled = excluded.enabled",
            params![
                job.id,
                job.name,
                job.schedule,
                job.command,
                job.cwd,
                job.timeout_seconds as i64,
                job.enabled as i64,
            ],
        )?;
        Ok(())
    }

    // -- JID aliases --------------------------------------------------------

    pub fn add_alias(&self, alias: &JidAlias) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO jid_aliases (alias_jid, canonical_jid, channel_name)
             VALUES (?1,?2,?3)",
            params![
                alias.alias_jid.as_str(),
                alias.canonical_jid.as_str(),
                alias.channel_name,
            ],
        )?;
        Ok(())
    }

    /// Resolve a channel-native JID to its canonical workspace JID, falling
    /// back to the input unchanged if no alias row exists.
    pub fn resolve_canonical(&self, jid: &ChatJid) -> Result<ChatJid> {
        let db = self.db.lock().unwrap();
        let found: Option<String> = db
            .query_row(
                "SELECT canonical_jid FROM jid_aliases WHERE alias_jid = ?1",
                params![jid.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.map(ChatJid::from).unwrap_or_else(|| jid.clone()))
    }

    /// All alias rows pointing at a canonical JID, keyed by channel name —
    /// used by the bus to resolve the channel-native address to send to.
    pub fn aliases_for_canonical(&self, jid: &ChatJid) -> Result<Vec<JidAlias>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT alias_jid, canonical_jid, channel_name FROM jid_aliases WHERE canonical_jid = ?1",
        )?;
        let rows = stmt.query_map(params![jid.as_str()], |r| {
            Ok(JidAlias {
                alias_jid: ChatJid::from(r.get::<_, String>(0)?),
                canonical_jid: ChatJid::from(r.get::<_, String>(1)?),
                channel_name: r.get(2)?,
            })
        })?;
        collect_rows(rows)
    }

    // -- Per-channel cursors --------------------------------------------------------

    pub fn get_cursor(
        &self,
        channel_name: &str,
        jid: &ChatJid,
        direction: crate::types::CursorDirection,
    ) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT cursor_value FROM channel_cursors
             WHERE channel_name = ?1 AND chat_jid = ?2 AND direction = ?3",
            params![channel_name, jid.as_str(), direction.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn set_cursor(
        &self,
        channel_name: &str,
        jid: &ChatJid,
        direction: crate::types::CursorDirection,
        value: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO channel_cursors (channel_name, chat_jid, direction, cursor_value, updated_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(channel_name, chat_jid, direction) DO UPDATE SET
               cursor_value = excluded.cursor_value, updated_at = excluded.updated_at",
            params![
                channel_name,
                jid.as_str(),
                direction.as_str(),
                value,
                rfc3339(&pynchy_core::types::now()),
            ],
        )?;
        Ok(())
    }

    // -- Outbound ledger & deliveries --------------------------------------------------

    pub fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO outbound_ledger (id, chat_jid, content, timestamp, source)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                entry.id,
                entry.chat_jid.as_str(),
                entry.content,
                rfc3339(&entry.timestamp),
                entry.source,
            ],
        )?;
        Ok(())
    }

    pub fn record_delivery_pending(&self, ledger_id: &str, channel_name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO outbound_deliveries (ledger_id, channel_name, delivered_at, error)
             VALUES (?1,?2,NULL,NULL)",
            params![ledger_id, channel_name],
        )?;
        Ok(())
    }

    pub fn mark_delivered(&self, ledger_id: &str, channel_name: &str, at: Timestamp) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE outbound_deliveries SET delivered_at = ?1, error = NULL
             WHERE ledger_id = ?2 AND channel_name = ?3",
            params![rfc3339(&at), ledger_id, channel_name],
        )?;
        Ok(())
    }

    pub fn mark_delivery_error(&self, ledger_id: &str, channel_name: &str, err: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE outbound_deliveries SET error = ?1, delivered_at = NULL
             WHERE ledger_id = ?2 AND channel_name = ?3",
            params![err, ledger_id, channel_name],
        )?;
        Ok(())
    }

    /// Deliveries eligible for retry: `delivered_at IS NULL` (§4.3
    /// reconciliation's outbound retry sweep), joined back to their ledger row.
    pub fn pending_deliveries(&self) -> Result<Vec<(LedgerEntry, Delivery)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT l.id, l.chat_jid, l.content, l.timestamp, l.source,
                    d.ledger_id, d.channel_name, d.delivered_at, d.error
             FROM outbound_deliveries d
             JOIN outbound_ledger l ON l.id = d.ledger_id
             WHERE d.delivered_at IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            let entry = LedgerEntry {
                id: row.get(0)?,
                chat_jid: ChatJid::from(row.get::<_, String>(1)?),
                content: row.get(2)?,
                timestamp: parse_ts(row, 3)?,
                source: row.get(4)?,
            };
            let delivered_at: Option<String> = row.get(7)?;
            let delivery = Delivery {
                ledger_id: row.get(5)?,
                channel_name: row.get(6)?,
                delivered_at: delivered_at.and_then(|s| parse_rfc3339(&s).ok()),
                error: row.get(8)?,
            };
            Ok((entry, delivery))
        })?;
        collect_rows(rows)
    }

    // -- Router state ------------------------------------------------------------------

    /// Load `last_timestamp` and `last_agent_timestamp` atomically.
    pub fn load_router_state(&self) -> Result<RouterState> {
        let db = self.db.lock().unwrap();
        let last_timestamp: Option<String> = db
            .query_row(
                "SELECT value FROM router_state WHERE key = 'last_timestamp'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        let last_agent_timestamp_json: Option<String> = db
            .query_row(
                "SELECT value FROM router_state WHERE key = 'last_agent_timestamp'",
                [],
                |r| r.get(0),
            )
            .optional()?;

        let last_agent_timestamp: HashMap<String, String> = last_agent_timestamp_json
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or_default();

        Ok(RouterState {
            last_timestamp: last_timestamp.and_then(|s| parse_rfc3339(&s).ok()),
            last_agent_timestamp: last_agent_timestamp
                .into_iter()
                .filter_map(|(k, v)| parse_rfc3339(&v).ok().map(|t| (k, t)))
                .collect(),
        })
    }

    /// Persist both cursors in a single transaction — §5 requires this
    /// composite write be atomic.
    #[instrument(skip(self, state))]
    pub fn save_router_state(&self, state: &RouterState) -> Result<()> {
        let map: HashMap<&str, String> = state
            .last_agent_timestamp
            .iter()
            .map(|(k, v)| (k.as_str(), rfc3339(v)))
            .collect();
        let agent_json = serde_json::to_string(&map)?;

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO router_state (key, value) VALUES ('last_timestamp', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![state.last_timestamp.map(|t| rfc3339(&t)).unwrap_or_default()],
        )?;
        tx.execute(
            "INSERT INTO router_state (key, value) VALUES ('last_agent_timestamp', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![agent_json],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- Plugin verification cache ------------------------------------------------------

    pub fn get_plugin_verdict(&self, plugin_name: &str, git_sha: &str) -> Result<Option<PluginVerification>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT plugin_name, git_sha, verdict, reasoning, verified_at
             FROM plugin_verification_cache WHERE plugin_name = ?1 AND git_sha = ?2",
            params![plugin_name, git_sha],
            row_to_plugin_verification,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Caches `pass`/`fail` verdicts only — callers must never call this with
    /// an `error` verdict (infrastructure failures retry next boot, §3).
    pub fn set_plugin_verdict(
        &self,
        plugin_name: &str,
        git_sha: &str,
        verdict: PluginVerdict,
        reasoning: &str,
        verified_at: Timestamp,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO plugin_verification_cache (plugin_name, git_sha, verdict, reasoning, verified_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(plugin_name, git_sha) DO UPDATE SET
               verdict = excluded.verdict, reasoning = excluded.reasoning, verified_at = excluded.verified_at",
            params![plugin_name, git_sha, verdict.as_str(), reasoning, rfc3339(&verified_at)],
        )?;
        Ok(())
    }
}

fn collect_rows<T>(rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let s: String = row.get(idx)?;
    parse_rfc3339(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let last: Option<String> = row.get(2)?;
    let cleared: Option<String> = row.get(3)?;
    Ok(Chat {
        jid: ChatJid::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        last_message_time: last.and_then(|s| parse_rfc3339(&s).ok()),
        cleared_at: cleared.and_then(|s| parse_rfc3339(&s).ok()),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let metadata: Option<String> = row.get(8)?;
    let message_type: String = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        chat_jid: ChatJid::from(row.get::<_, String>(1)?),
        sender: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        timestamp: parse_ts(row, 5)?,
        is_from_me: row.get::<_, i64>(6)? != 0,
        message_type: message_type.parse().unwrap_or(MessageType::User),
        metadata: metadata
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .unwrap_or(None),
    })
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    let security_profile_str: String = row.get(5)?;
    Ok(Workspace {
        jid: ChatJid::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        folder: WorkspaceFolder::from(row.get::<_, String>(2)?),
        trigger: row.get(3)?,
        is_admin: row.get::<_, i64>(4)? != 0,
        security_profile: serde_json::from_str(&security_profile_str)
            .unwrap_or(serde_json::Value::Null),
        added_at: parse_ts(row, 6)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let next_run: Option<String> = row.get(6)?;
    let last_run: Option<String> = row.get(7)?;
    let schedule_type: String = row.get(4)?;
    let status: String = row.get(9)?;
    let context_mode: String = row.get(10)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        group_folder: WorkspaceFolder::from(row.get::<_, String>(1)?),
        chat_jid: ChatJid::from(row.get::<_, String>(2)?),
        prompt: row.get(3)?,
        schedule_type: schedule_type.parse().unwrap_or(ScheduleType::Once),
        schedule_value: row.get(5)?,
        next_run: next_run.and_then(|s| parse_rfc3339(&s).ok()),
        last_run: last_run.and_then(|s| parse_rfc3339(&s).ok()),
        last_result: row.get(8)?,
        status: status.parse().unwrap_or(TaskStatus::Active),
        context_mode: context_mode.parse().unwrap_or(ContextMode::Group),
        repo_access: row.get(11)?,
    })
}

fn row_to_host_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<HostJob> {
    Ok(HostJob {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule: row.get(2)?,
        command: row.get(3)?,
        cwd: row.get(4)?,
        timeout_seconds: row.get::<_, i64>(5)? as u64,
        enabled: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_plugin_verification(row: &rusqlite::Row<'_>) -> rusqlite::Result<PluginVerification> {
    let verdict: String = row.get(2)?;
    Ok(PluginVerification {
        plugin_name: row.get(0)?,
        git_sha: row.get(1)?,
        verdict: if verdict == "pass" {
            PluginVerdict::Pass
        } else {
            PluginVerdict::Fail
        },
        reasoning: row.get(3)?,
        verified_at: parse_ts(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pynchy_core::types::now;

    fn msg(id: &str, jid: &str, ts: Timestamp) -> Message {
        Message {
            id: id.to_string(),
            chat_jid: ChatJid::from(jid),
            sender: "u1".to_string(),
            sender_name: None,
            content: "hello".to_string(),
            timestamp: ts,
            is_from_me: false,
            message_type: MessageType::User,
            metadata: None,
        }
    }

    #[test]
    fn messages_since_orders_by_timestamp_then_id() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = now();
        let t1 = t0 + chrono::Duration::seconds(1);
        store.store_message(&msg("b", "acme", t1)).unwrap();
        store.store_message(&msg("a", "acme", t0)).unwrap();
        let rows = store.messages_since(None).unwrap();
        assert_eq!(rows.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn cursor_is_never_silently_overwritten_by_none() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = now();
        store.store_message(&msg("a", "acme", t0)).unwrap();
        let after = store.messages_since(None).unwrap()[0].timestamp;
        let rows = store.messages_since(Some(after)).unwrap();
        assert!(rows.is_empty(), "strictly-greater-than excludes the cursor row itself");
    }

    #[test]
    fn router_state_round_trips_atomically() {
        let store = StateStore::open_in_memory().unwrap();
        let mut state = RouterState::default();
        state.last_timestamp = Some(now());
        state.last_agent_timestamp.insert("acme".to_string(), now());
        store.save_router_state(&state).unwrap();
        let loaded = store.load_router_state().unwrap();
        assert!(loaded.last_timestamp.is_some());
        assert!(loaded.last_agent_timestamp.contains_key("acme"));
    }

    #[test]
    fn session_clear_then_get_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        let folder = WorkspaceFolder::from("acme");
        store.set_session_id(&folder, "s1").unwrap();
        assert_eq!(store.get_session_id(&folder).unwrap(), Some("s1".to_string()));
        store.clear_session(&folder).unwrap();
        assert_eq!(store.get_session_id(&folder).unwrap(), None);
    }

    #[test]
    fn delivery_is_either_delivered_xor_errored() {
        let store = StateStore::open_in_memory().unwrap();
        let entry = LedgerEntry {
            id: "l1".to_string(),
            chat_jid: ChatJid::from("acme"),
            content: "hi".to_string(),
            timestamp: now(),
            source: "agent".to_string(),
        };
        store.insert_ledger_entry(&entry).unwrap();
        store.record_delivery_pending("l1", "slack").unwrap();
        assert_eq!(store.pending_deliveries().unwrap().len(), 1);
        store.mark_delivered("l1", "slack", now()).unwrap();
        assert_eq!(store.pending_deliveries().unwrap().len(), 0);
    }
}
