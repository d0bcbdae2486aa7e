use crate::error::LedgerError;
use crate::transcript::{build_tree, resolve_branch, MessageNode};
use crate::types::{
    BeginRunOptions, Branch, FinalizeResult, FinalizeStatus, RecoverAction, RecoverResult,
    StaleRunInfo, StaleRunQuery, ThreadTree,
};
use rusqlite::{params, Connection, OptionalExtension};
use skein_core::{
    now_rfc3339_millis, run_stream_id, CanonicalMessage, CanonicalPart, IdGenerator,
    MessageMetadata, Role, RunRecord, RunStatus, UlidGenerator,
};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// The run lifecycle and canonical transcript store.
pub struct LedgerStore {
    conn: Connection,
    id_gen: Box<dyn IdGenerator>,
}

impl LedgerStore {
    /// Open (or create) the ledger at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates tables if
    /// needed. Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let store = LedgerStore {
            conn,
            id_gen: Box::new(UlidGenerator::new()),
        };
        store.apply_pragmas()?;
        store.integrity_check()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let store = LedgerStore {
            conn,
            id_gen: Box::new(UlidGenerator::new()),
        };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// Replace the run-id generator (deterministic ids in tests).
    pub fn with_id_generator(mut self, id_gen: Box<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    /// Create a run in `created` state with a fresh id and stream.
    pub fn begin_run(&mut self, options: &BeginRunOptions) -> Result<RunRecord, LedgerError> {
        if options.thread_id.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "thread_id must not be empty".to_owned(),
            ));
        }
        let run_id = self.id_gen.next_id();
        let record = RunRecord {
            stream_id: run_stream_id(&run_id),
            run_id,
            thread_id: options.thread_id.clone(),
            fork_from_message_id: options.fork_from_message_id.clone(),
            status: RunStatus::Created,
            created_at: now_rfc3339_millis(),
            finished_at: None,
            message_count: 0,
        };
        self.conn.execute(
            "INSERT INTO runs
                 (run_id, thread_id, stream_id, fork_from_message_id, status,
                  created_at, finished_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0)",
            params![
                record.run_id,
                record.thread_id,
                record.stream_id,
                record.fork_from_message_id,
                record.status.as_str(),
                record.created_at,
            ],
        )?;
        Ok(record)
    }

    /// Transition `created` -> `streaming`.
    pub fn activate_run(&mut self, run_id: &str) -> Result<RunRecord, LedgerError> {
        let mut run = self
            .get_run(run_id)?
            .ok_or_else(|| LedgerError::NotFound(run_id.to_owned()))?;
        if run.status != RunStatus::Created {
            return Err(LedgerError::InvalidState(format!(
                "run {run_id} is {}, expected created",
                run.status.as_str()
            )));
        }
        self.conn.execute(
            "UPDATE runs SET status = ?2 WHERE run_id = ?1",
            params![run_id, RunStatus::Streaming.as_str()],
        )?;
        run.status = RunStatus::Streaming;
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, thread_id, stream_id, fork_from_message_id, status,
                        created_at, finished_at, message_count
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                map_run,
            )
            .optional()?;
        row.transpose()
    }

    /// All runs of a thread, oldest first.
    pub fn list_runs(&self, thread_id: &str) -> Result<Vec<RunRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, thread_id, stream_id, fork_from_message_id, status,
                    created_at, finished_at, message_count
             FROM runs WHERE thread_id = ?1
             ORDER BY created_at ASC, run_id ASC",
        )?;
        let rows = stmt.query_map(params![thread_id], map_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }

    // -----------------------------------------------------------------------
    // finalize_run
    // -----------------------------------------------------------------------

    /// Drive a run to a terminal state; on commit, persist its messages.
    ///
    /// Idempotence ladder, checked in order: unknown run -> `NotFound`; same
    /// terminal state -> no-op `{committed: true}`; other terminal state ->
    /// `{committed: false}`; otherwise the transition runs in one
    /// transaction. The commit path supersedes sibling committed runs at the
    /// same fork point (their messages are retained), assigns gapless thread
    /// ordinals, and inserts messages and parts before flipping the run
    /// status. Any failure rolls the whole transaction back.
    pub fn finalize_run(
        &mut self,
        run_id: &str,
        status: FinalizeStatus,
    ) -> Result<FinalizeResult, LedgerError> {
        let run = self
            .get_run(run_id)?
            .ok_or_else(|| LedgerError::NotFound(run_id.to_owned()))?;
        let target = status.target();
        if run.status == target {
            return Ok(FinalizeResult {
                committed: true,
                superseded_run_ids: Vec::new(),
            });
        }
        if run.status.is_terminal() {
            return Ok(FinalizeResult {
                committed: false,
                superseded_run_ids: Vec::new(),
            });
        }

        if let FinalizeStatus::Committed(messages) = &status {
            for message in messages {
                if message.parts.is_empty() {
                    return Err(LedgerError::InvalidArgument(format!(
                        "message {} has no parts",
                        message.id
                    )));
                }
            }
        }

        let finished_at = now_rfc3339_millis();
        let tx = self.conn.transaction()?;
        let mut superseded_run_ids = Vec::new();

        match &status {
            FinalizeStatus::Committed(messages) => {
                if let Some(fork_id) = &run.fork_from_message_id {
                    let mut stmt = tx.prepare(
                        "SELECT run_id FROM runs
                         WHERE thread_id = ?1 AND fork_from_message_id = ?2
                           AND status = 'committed' AND run_id != ?3",
                    )?;
                    let siblings = stmt.query_map(
                        params![run.thread_id, fork_id, run_id],
                        |row| row.get::<_, String>(0),
                    )?;
                    for sibling in siblings {
                        superseded_run_ids.push(sibling?);
                    }
                    drop(stmt);
                    for sibling in &superseded_run_ids {
                        tx.execute(
                            "UPDATE runs SET status = 'superseded', finished_at = ?2
                             WHERE run_id = ?1",
                            params![sibling, finished_at],
                        )?;
                    }
                }

                let max_ordinal: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(ordinal), 0) FROM messages WHERE thread_id = ?1",
                    params![run.thread_id],
                    |row| row.get(0),
                )?;
                let mut ordinal = max_ordinal + 1;

                let mut insert_message = tx.prepare(
                    "INSERT INTO messages
                         (id, run_id, thread_id, parent_message_id, role,
                          created_at, metadata, ordinal)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                let mut insert_part = tx.prepare(
                    "INSERT INTO parts (message_id, type, data, ordinal)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for message in messages {
                    let metadata = serde_json::to_string(&message.metadata)
                        .map_err(|e| LedgerError::InvalidData(e.to_string()))?;
                    insert_message.execute(params![
                        message.id,
                        run_id,
                        run.thread_id,
                        message.parent_message_id,
                        message.role.as_str(),
                        message.created_at,
                        metadata,
                        ordinal,
                    ])?;
                    ordinal += 1;
                    for (part_ordinal, part) in message.parts.iter().enumerate() {
                        let data = serde_json::to_string(part)
                            .map_err(|e| LedgerError::InvalidData(e.to_string()))?;
                        insert_part.execute(params![
                            message.id,
                            part.type_str(),
                            data,
                            part_ordinal as i64,
                        ])?;
                    }
                }
                drop(insert_message);
                drop(insert_part);

                tx.execute(
                    "UPDATE runs SET status = 'committed', finished_at = ?2,
                            message_count = ?3
                     WHERE run_id = ?1",
                    params![run_id, finished_at, messages.len() as i64],
                )?;
            }
            FinalizeStatus::Failed | FinalizeStatus::Cancelled => {
                tx.execute(
                    "UPDATE runs SET status = ?2, finished_at = ?3 WHERE run_id = ?1",
                    params![run_id, target.as_str(), finished_at],
                )?;
            }
        }

        tx.commit()?;
        Ok(FinalizeResult {
            committed: true,
            superseded_run_ids,
        })
    }

    // -----------------------------------------------------------------------
    // Transcript and tree
    // -----------------------------------------------------------------------

    /// Resolve a branch of the thread into an ordered message list.
    pub fn get_transcript(
        &self,
        thread_id: &str,
        branch: &Branch,
    ) -> Result<Vec<CanonicalMessage>, LedgerError> {
        let nodes = self.load_thread(thread_id)?;
        let path = resolve_branch(&nodes, branch);
        Ok(path
            .into_iter()
            .map(|idx| nodes[idx].message.clone())
            .collect())
    }

    /// Derived tree view of the thread: all message nodes plus fork points.
    pub fn get_thread_tree(&self, thread_id: &str) -> Result<ThreadTree, LedgerError> {
        let nodes = self.load_thread(thread_id)?;
        Ok(build_tree(&nodes))
    }

    /// Largest committed ordinal in the thread (0 when empty). Ordinals are
    /// gapless, so this equals the `branch: All` transcript length.
    pub fn max_ordinal(&self, thread_id: &str) -> Result<i64, LedgerError> {
        let max: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(ordinal), 0) FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    // -----------------------------------------------------------------------
    // Stale runs and recovery
    // -----------------------------------------------------------------------

    /// Active runs at least `older_than_ms` old, oldest first.
    pub fn list_stale_runs(&self, query: &StaleRunQuery) -> Result<Vec<StaleRunInfo>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, thread_id, stream_id, fork_from_message_id, status,
                    created_at, finished_at, message_count
             FROM runs
             WHERE status IN ('created', 'streaming')
               AND (?1 IS NULL OR thread_id = ?1)
             ORDER BY created_at ASC, run_id ASC",
        )?;
        let rows = stmt.query_map(params![query.thread_id], map_run)?;

        let now = chrono::Utc::now();
        let mut stale = Vec::new();
        for row in rows {
            let run = row??;
            let created = chrono::DateTime::parse_from_rfc3339(&run.created_at)
                .map_err(|e| LedgerError::InvalidData(format!("bad created_at: {e}")))?;
            let age_ms = now
                .signed_duration_since(created)
                .num_milliseconds()
                .max(0) as u64;
            if age_ms >= query.older_than_ms {
                stale.push(StaleRunInfo { run, age_ms });
            }
        }
        Ok(stale)
    }

    /// Force an abandoned run to `failed` or `cancelled`.
    pub fn recover_run(
        &mut self,
        run_id: &str,
        action: RecoverAction,
    ) -> Result<RecoverResult, LedgerError> {
        let run = self
            .get_run(run_id)?
            .ok_or_else(|| LedgerError::NotFound(run_id.to_owned()))?;
        if !run.status.is_active() {
            return Err(LedgerError::InvalidState(format!(
                "run {run_id} is {}, expected an active status",
                run.status.as_str()
            )));
        }
        let new_status = action.target();
        self.conn.execute(
            "UPDATE runs SET status = ?2, finished_at = ?3 WHERE run_id = ?1",
            params![run_id, new_status.as_str(), now_rfc3339_millis()],
        )?;
        Ok(RecoverResult {
            run_id: run_id.to_owned(),
            previous_status: run.status,
            new_status,
        })
    }

    /// Remove all runs, messages, and parts of the thread in one transaction.
    pub fn delete_thread(&mut self, thread_id: &str) -> Result<(), LedgerError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM parts WHERE message_id IN
                 (SELECT id FROM messages WHERE thread_id = ?1)",
            params![thread_id],
        )?;
        tx.execute("DELETE FROM messages WHERE thread_id = ?1", params![thread_id])?;
        tx.execute("DELETE FROM runs WHERE thread_id = ?1", params![thread_id])?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn load_thread(&self, thread_id: &str) -> Result<Vec<MessageNode>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.run_id, m.parent_message_id, m.role, m.created_at,
                    m.metadata, m.ordinal, r.status
             FROM messages m JOIN runs r ON r.run_id = m.run_id
             WHERE m.thread_id = ?1
             ORDER BY m.ordinal ASC",
        )?;
        struct Row {
            id: String,
            run_id: String,
            parent: Option<String>,
            role: String,
            created_at: String,
            metadata: String,
            ordinal: i64,
            run_status: String,
        }
        let rows = stmt.query_map(params![thread_id], |row| {
            Ok(Row {
                id: row.get(0)?,
                run_id: row.get(1)?,
                parent: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
                metadata: row.get(5)?,
                ordinal: row.get(6)?,
                run_status: row.get(7)?,
            })
        })?;

        let mut parts = self.load_parts(thread_id)?;
        let mut nodes = Vec::new();
        for row in rows {
            let row = row?;
            let role = Role::parse(&row.role)
                .ok_or_else(|| LedgerError::InvalidData(format!("unknown role: {}", row.role)))?;
            let run_status = RunStatus::parse(&row.run_status).ok_or_else(|| {
                LedgerError::InvalidData(format!("unknown run status: {}", row.run_status))
            })?;
            let metadata: MessageMetadata = serde_json::from_str(&row.metadata)
                .map_err(|e| LedgerError::InvalidData(format!("bad metadata: {e}")))?;
            nodes.push(MessageNode {
                message: CanonicalMessage {
                    parts: parts.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    parent_message_id: row.parent,
                    role,
                    created_at: row.created_at,
                    metadata,
                },
                ordinal: row.ordinal,
                run_id: row.run_id,
                run_status,
            });
        }
        Ok(nodes)
    }

    fn load_parts(
        &self,
        thread_id: &str,
    ) -> Result<HashMap<String, Vec<CanonicalPart>>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.message_id, p.data
             FROM parts p JOIN messages m ON m.id = p.message_id
             WHERE m.thread_id = ?1
             ORDER BY p.message_id, p.ordinal ASC",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut parts: HashMap<String, Vec<CanonicalPart>> = HashMap::new();
        for row in rows {
            let (message_id, data) = row?;
            let part: CanonicalPart = serde_json::from_str(&data)
                .map_err(|e| LedgerError::InvalidData(format!("bad part: {e}")))?;
            parts.entry(message_id).or_default().push(part);
        }
        Ok(parts)
    }

    fn apply_pragmas(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA wal_autocheckpoint=1000;
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn integrity_check(&self) -> Result<(), LedgerError> {
        let result: String = self
            .conn
            .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(LedgerError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }
}

fn map_run(row: &rusqlite::Row<'_>) -> Result<Result<RunRecord, LedgerError>, rusqlite::Error> {
    let status_str: String = row.get(4)?;
    let status = match RunStatus::parse(&status_str) {
        Some(status) => status,
        None => {
            return Ok(Err(LedgerError::InvalidData(format!(
                "unknown run status: {status_str}"
            ))))
        }
    };
    Ok(Ok(RunRecord {
        run_id: row.get(0)?,
        thread_id: row.get(1)?,
        stream_id: row.get(2)?,
        fork_from_message_id: row.get(3)?,
        status,
        created_at: row.get(5)?,
        finished_at: row.get(6)?,
        message_count: row.get::<_, i64>(7)? as u32,
    }))
}
