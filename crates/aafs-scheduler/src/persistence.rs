//! SQLite-backed persistence for the task queue, task log, timelines,
//! catalog snapshots and aliases.
//! Several dispatcher processes may share one database file: activation runs
//! inside an IMMEDIATE transaction, so only one writer can claim a task.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::error::{StoreError, StoreResult};
use crate::store::{CatalogSnapshot, Claim, LogEntry, Store, StoreProvider, TaskQuery, TimelineEntry};
use crate::task::{NewTask, PendingTask};
use crate::timeline::ActionCode;

const TASK_COLUMNS: &str = "record_key, event_id, sched_time, exec_time, submit_time, submit_id, \
     opcode, stage, details, active, attempt, owner, lease_until";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(
            "
            -- Task queue
            CREATE TABLE IF NOT EXISTS pending_tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL UNIQUE,
                event_id TEXT NOT NULL,
                sched_time INTEGER NOT NULL,
                exec_time INTEGER NOT NULL,
                submit_time INTEGER NOT NULL,
                submit_id TEXT NOT NULL,
                opcode INTEGER NOT NULL,
                stage INTEGER NOT NULL DEFAULT 0,
                details TEXT NOT NULL DEFAULT '{}',
                active INTEGER NOT NULL DEFAULT 0,
                attempt INTEGER NOT NULL DEFAULT 0,
                owner TEXT,                      -- dispatcher holding the activation
                lease_until INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_ready ON pending_tasks(active, exec_time, seq);
            CREATE INDEX IF NOT EXISTS idx_tasks_event ON pending_tasks(event_id);

            -- Task dispositions (write-once)
            CREATE TABLE IF NOT EXISTS task_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL,
                event_id TEXT NOT NULL,
                opcode INTEGER NOT NULL,
                stage INTEGER NOT NULL,
                submit_id TEXT NOT NULL,
                log_time INTEGER NOT NULL,
                rescode INTEGER NOT NULL,
                remark TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_log_key ON task_log(record_key);
            CREATE INDEX IF NOT EXISTS idx_log_event ON task_log(event_id, log_time);

            -- Timelines (append-only)
            CREATE TABLE IF NOT EXISTS timeline_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL,
                event_id TEXT NOT NULL,
                action_time INTEGER NOT NULL,
                actcode TEXT NOT NULL,
                details TEXT NOT NULL,
                UNIQUE (event_id, action_time)
            );
            CREATE INDEX IF NOT EXISTS idx_timeline_key ON timeline_entries(record_key);

            -- Aftershock catalogs used by forecasts
            CREATE TABLE IF NOT EXISTS catalog_snapshots (
                record_key TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                ruptures TEXT NOT NULL           -- JSON array
            );

            -- External event id → timeline id
            CREATE TABLE IF NOT EXISTS timeline_aliases (
                external_id TEXT PRIMARY KEY,
                timeline_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<PendingTask> {
    Ok(PendingTask {
        record_key: row.get(0)?,
        event_id: row.get(1)?,
        sched_time: row.get(2)?,
        exec_time: row.get(3)?,
        submit_time: row.get(4)?,
        submit_id: row.get(5)?,
        opcode: row.get(6)?,
        stage: row.get(7)?,
        details: row.get(8)?,
        active: row.get(9)?,
        attempt: row.get(10)?,
        owner: row.get(11)?,
        lease_until: row.get(12)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        key: row.get(0)?,
        event_id: row.get(1)?,
        opcode: row.get(2)?,
        stage: row.get(3)?,
        submit_id: row.get(4)?,
        log_time: row.get(5)?,
        rescode: row.get(6)?,
        remark: row.get(7)?,
    })
}

/// Raw timeline row; the action code is checked after the query.
type TimelineRow = (String, String, i64, String, String);

fn timeline_row(row: &Row<'_>) -> rusqlite::Result<TimelineRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn timeline_from_raw((key, event_id, action_time, actcode, details): TimelineRow) -> StoreResult<TimelineEntry> {
    let actcode = ActionCode::parse(&actcode)
        .ok_or_else(|| StoreError::Malformed(format!("unknown action code '{actcode}'")))?;
    Ok(TimelineEntry {
        key,
        event_id,
        action_time,
        actcode,
        details,
    })
}

const LOG_COLUMNS: &str = "record_key, event_id, opcode, stage, submit_id, log_time, rescode, remark";
const TIMELINE_COLUMNS: &str = "record_key, event_id, action_time, actcode, details";

impl Store for SqliteStore {
    // ─── Tasks ────────────────────────────────────────────────

    fn submit(&self, task: NewTask) -> StoreResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO pending_tasks
             (record_key, event_id, sched_time, exec_time, submit_time, submit_id, opcode, stage, details)
             VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.record_key,
                task.event_id,
                task.sched_time,
                task.submit_time,
                task.submit_id,
                task.opcode,
                task.stage,
                task.details,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn activate_first_ready(&self, cutoff: i64, claim: &Claim) -> StoreResult<Option<PendingTask>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: Option<(i64, Option<String>, i64)> = tx
            .query_row(
                "SELECT seq, owner, lease_until FROM pending_tasks WHERE active = 1 ORDER BY seq LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let seq = match active {
            Some((seq, owner, lease_until)) => {
                let ours = owner.as_deref() == Some(claim.owner.as_str());
                if !ours && lease_until > claim.true_time {
                    return Ok(None);
                }
                seq
            }
            None => {
                let ready: Option<i64> = tx
                    .query_row(
                        "SELECT seq FROM pending_tasks WHERE active = 0 AND exec_time <= ?1
                         ORDER BY exec_time, seq LIMIT 1",
                        params![cutoff],
                        |row| row.get(0),
                    )
                    .optional()?;
                match ready {
                    Some(seq) => seq,
                    None => return Ok(None),
                }
            }
        };

        tx.execute(
            "UPDATE pending_tasks SET active = 1, attempt = attempt + 1, owner = ?1, lease_until = ?2
             WHERE seq = ?3",
            params![claim.owner, claim.lease_until(), seq],
        )?;
        let task = tx.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM pending_tasks WHERE seq = ?1"),
            params![seq],
            task_from_row,
        )?;
        tx.commit()?;
        Ok(Some(task))
    }

    fn stage(&self, task: &PendingTask, exec_time: i64, stage: i32) -> StoreResult<()> {
        let updated = self.conn()?.execute(
            "UPDATE pending_tasks SET exec_time = ?1, stage = ?2, active = 0, attempt = 0,
             owner = NULL, lease_until = 0 WHERE record_key = ?3",
            params![exec_time, stage, task.record_key],
        )?;
        if updated == 0 {
            return Err(StoreError::TaskNotFound(task.record_key.clone()));
        }
        Ok(())
    }

    fn delete(&self, task: &PendingTask) -> StoreResult<()> {
        self.conn()?
            .execute("DELETE FROM pending_tasks WHERE record_key = ?1", params![task.record_key])?;
        Ok(())
    }

    fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<PendingTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM pending_tasks
             WHERE (?1 IS NULL OR event_id = ?1)
               AND (?2 IS NULL OR exec_time >= ?2)
               AND (?3 IS NULL OR exec_time <= ?3)
               AND (?4 = 0 OR active = 0)
             ORDER BY exec_time, seq"
        ))?;
        let rows = stmt.query_map(
            params![query.event_id, query.exec_from, query.exec_to, query.waiting_only],
            task_from_row,
        )?;
        let mut tasks = Vec::new();
        for task in rows {
            let task = task?;
            if query.opcodes.is_empty() || query.opcodes.contains(&task.opcode) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    // ─── Log ──────────────────────────────────────────────────

    fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.conn()?.execute(
            &format!("INSERT INTO task_log ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                entry.key,
                entry.event_id,
                entry.opcode,
                entry.stage,
                entry.submit_id,
                entry.log_time,
                entry.rescode,
                entry.remark,
            ],
        )?;
        Ok(())
    }

    fn log_for_key(&self, key: &str) -> StoreResult<Option<LogEntry>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM task_log WHERE record_key = ?1 ORDER BY id LIMIT 1"),
                params![key],
                log_from_row,
            )
            .optional()?)
    }

    fn logs_for_event(&self, event_id: &str) -> StoreResult<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM task_log WHERE event_id = ?1 ORDER BY log_time, id"
        ))?;
        let rows = stmt.query_map(params![event_id], log_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ─── Timeline ─────────────────────────────────────────────

    fn append_timeline(&self, entry: &TimelineEntry) -> StoreResult<()> {
        let result = self.conn()?.execute(
            &format!("INSERT INTO timeline_entries ({TIMELINE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                entry.key,
                entry.event_id,
                entry.action_time,
                entry.actcode.as_str(),
                entry.details,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateTimeline {
                    event_id: entry.event_id.clone(),
                    action_time: entry.action_time,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn latest_timeline(&self, event_id: &str) -> StoreResult<Option<TimelineEntry>> {
        let raw = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {TIMELINE_COLUMNS} FROM timeline_entries WHERE event_id = ?1
                     ORDER BY action_time DESC LIMIT 1"
                ),
                params![event_id],
                timeline_row,
            )
            .optional()?;
        raw.map(timeline_from_raw).transpose()
    }

    fn timeline_for_key(&self, key: &str) -> StoreResult<Option<TimelineEntry>> {
        let raw = self
            .conn()?
            .query_row(
                &format!("SELECT {TIMELINE_COLUMNS} FROM timeline_entries WHERE record_key = ?1 ORDER BY id LIMIT 1"),
                params![key],
                timeline_row,
            )
            .optional()?;
        raw.map(timeline_from_raw).transpose()
    }

    fn timeline_history(&self, event_id: &str) -> StoreResult<Vec<TimelineEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline_entries WHERE event_id = ?1 ORDER BY action_time"
        ))?;
        let rows = stmt.query_map(params![event_id], timeline_row)?;
        rows.map(|row| timeline_from_raw(row?)).collect()
    }

    // ─── Catalog snapshots ────────────────────────────────────

    fn put_catalog(&self, snapshot: &CatalogSnapshot) -> StoreResult<()> {
        let ruptures = serde_json::to_string(&snapshot.ruptures)
            .map_err(|e| StoreError::Malformed(format!("catalog snapshot: {e}")))?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO catalog_snapshots (record_key, event_id, start_time, end_time, ruptures)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![snapshot.key, snapshot.event_id, snapshot.start_time, snapshot.end_time, ruptures],
        )?;
        Ok(())
    }

    fn catalog_for_key(&self, key: &str) -> StoreResult<Option<CatalogSnapshot>> {
        let raw: Option<(String, String, i64, i64, String)> = self
            .conn()?
            .query_row(
                "SELECT record_key, event_id, start_time, end_time, ruptures
                 FROM catalog_snapshots WHERE record_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        raw.map(|(key, event_id, start_time, end_time, ruptures)| {
            let ruptures = serde_json::from_str(&ruptures)
                .map_err(|e| StoreError::Malformed(format!("catalog snapshot {key}: {e}")))?;
            Ok(CatalogSnapshot {
                key,
                event_id,
                start_time,
                end_time,
                ruptures,
            })
        })
        .transpose()
    }

    fn delete_catalog(&self, key: &str) -> StoreResult<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM catalog_snapshots WHERE record_key = ?1", params![key])?)
    }

    // ─── Aliases ──────────────────────────────────────────────

    fn put_alias(&self, external_id: &str, timeline_id: &str, time: i64) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO timeline_aliases (external_id, timeline_id, created_at) VALUES (?1, ?2, ?3)",
            params![external_id, timeline_id, time],
        )?;
        Ok(())
    }

    fn resolve_alias(&self, external_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT timeline_id FROM timeline_aliases WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

/// Opens a fresh [`SqliteStore`] on every connect.
pub struct SqliteProvider {
    path: PathBuf,
}

impl SqliteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreProvider for SqliteProvider {
    fn connect(&self) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(SqliteStore::open(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ResultCode;
    use crate::task::{Opcode, SUBID_CLI};
    use aafs_core::Rupture;

    fn claim(owner: &str) -> Claim {
        Claim {
            owner: owner.into(),
            true_time: 1_000,
            lease: 60_000,
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteStore::open(&dir.path().join("aafs.db")).unwrap();
        assert!(db.query_tasks(&TaskQuery::default()).unwrap().is_empty());
        // Reopening runs the migration again without error.
        drop(db);
        SqliteStore::open(&dir.path().join("aafs.db")).unwrap();
    }

    #[test]
    fn test_submit_activate_stage_delete() {
        let db = SqliteStore::open_in_memory().unwrap();
        let task = NewTask::new("ev1", Opcode::GenForecast, 500, 10, SUBID_CLI)
            .with_stage(2)
            .with_details("{\"x\":1}".into());
        let key = task.record_key.clone();
        assert!(db.submit(task.clone()).unwrap());
        assert!(!db.submit(task).unwrap());

        assert!(db.activate_first_ready(499, &claim("a")).unwrap().is_none());
        let active = db.activate_first_ready(500, &claim("a")).unwrap().unwrap();
        assert_eq!(active.record_key, key);
        assert_eq!(active.stage, 2);
        assert_eq!(active.details, "{\"x\":1}");
        assert!(active.active);
        assert_eq!(active.owner.as_deref(), Some("a"));

        db.stage(&active, 800, 3).unwrap();
        let waiting = db.query_tasks(&TaskQuery::for_event("ev1").waiting()).unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].exec_time, 800);
        assert_eq!(waiting[0].sched_time, 500);
        assert_eq!(waiting[0].attempt, 0);

        db.delete(&waiting[0]).unwrap();
        assert!(db.query_tasks(&TaskQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_restart_and_blocking() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.submit(NewTask::new("ev1", Opcode::NoOp, 1, 0, SUBID_CLI)).unwrap();
        db.submit(NewTask::new("ev2", Opcode::NoOp, 2, 0, SUBID_CLI)).unwrap();

        let first = db.activate_first_ready(10, &claim("a")).unwrap().unwrap();
        assert!(db.activate_first_ready(10, &claim("b")).unwrap().is_none());
        let again = db.activate_first_ready(10, &claim("a")).unwrap().unwrap();
        assert_eq!(again.record_key, first.record_key);
        assert!(again.is_restarted());

        let late = Claim {
            owner: "b".into(),
            true_time: 1_000_000,
            lease: 60_000,
        };
        let taken = db.activate_first_ready(10, &late).unwrap().unwrap();
        assert_eq!(taken.record_key, first.record_key);
        assert_eq!(taken.attempt, 3);
    }

    #[test]
    fn test_query_by_opcode_and_range() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.submit(NewTask::new("ev1", Opcode::GenForecast, 100, 0, SUBID_CLI)).unwrap();
        db.submit(NewTask::new("ev1", Opcode::GenExpire, 200, 0, SUBID_CLI)).unwrap();
        db.submit(NewTask::new("ev1", Opcode::IntakeSync, 300, 0, SUBID_CLI)).unwrap();
        db.submit(NewTask::new("ev2", Opcode::GenForecast, 400, 0, SUBID_CLI)).unwrap();

        let delayed = db
            .query_tasks(&TaskQuery::for_event("ev1").with_opcodes(&Opcode::DELAYED_TIMELINE))
            .unwrap();
        assert_eq!(delayed.len(), 2);

        let range = TaskQuery {
            exec_from: Some(150),
            exec_to: Some(350),
            ..TaskQuery::default()
        };
        let found = db.query_tasks(&range).unwrap();
        assert_eq!(found.iter().map(|t| t.exec_time).collect::<Vec<_>>(), vec![200, 300]);
    }

    #[test]
    fn test_log_roundtrip() {
        let db = SqliteStore::open_in_memory().unwrap();
        let task = NewTask::new("ev1", Opcode::IntakeSync, 1, 0, SUBID_CLI).into_pending();
        assert!(db.log_for_key(&task.record_key).unwrap().is_none());
        db.append_log(&LogEntry::for_task(&task, 77, ResultCode::TimelineExists, "exists"))
            .unwrap();
        let entry = db.log_for_key(&task.record_key).unwrap().unwrap();
        assert_eq!(entry.result_code(), Some(ResultCode::TimelineExists));
        assert_eq!(entry.log_time, 77);
        assert_eq!(db.logs_for_event("ev1").unwrap().len(), 1);
    }

    #[test]
    fn test_timeline_order_and_uniqueness() {
        let db = SqliteStore::open_in_memory().unwrap();
        for (t, code) in [(10, ActionCode::Track), (30, ActionCode::Forecast), (20, ActionCode::Analyst)] {
            db.append_timeline(&TimelineEntry {
                key: format!("k{t}"),
                event_id: "ev".into(),
                action_time: t,
                actcode: code,
                details: "{}".into(),
            })
            .unwrap();
        }
        let latest = db.latest_timeline("ev").unwrap().unwrap();
        assert_eq!(latest.actcode, ActionCode::Forecast);
        assert_eq!(db.timeline_for_key("k20").unwrap().unwrap().action_time, 20);
        let history: Vec<_> = db.timeline_history("ev").unwrap().iter().map(|e| e.action_time).collect();
        assert_eq!(history, vec![10, 20, 30]);

        let dup = TimelineEntry {
            key: "other".into(),
            event_id: "ev".into(),
            action_time: 30,
            actcode: ActionCode::Expire,
            details: "{}".into(),
        };
        assert!(matches!(db.append_timeline(&dup), Err(StoreError::DuplicateTimeline { .. })));
    }

    #[test]
    fn test_catalog_and_alias() {
        let db = SqliteStore::open_in_memory().unwrap();
        let snapshot = CatalogSnapshot {
            key: "k1".into(),
            event_id: "ev".into(),
            start_time: 0,
            end_time: 100,
            ruptures: vec![Rupture::new("as1", 50, 35.0, -117.0, 5.0, 3.5)],
        };
        db.put_catalog(&snapshot).unwrap();
        assert_eq!(db.catalog_for_key("k1").unwrap(), Some(snapshot));
        assert_eq!(db.delete_catalog("k1").unwrap(), 1);
        assert_eq!(db.delete_catalog("k1").unwrap(), 0);

        db.put_alias("us1000", "aafs-us1000", 5).unwrap();
        assert_eq!(db.resolve_alias("us1000").unwrap().as_deref(), Some("aafs-us1000"));
        assert_eq!(db.resolve_alias("nope").unwrap(), None);
    }

    #[test]
    fn test_two_connections_share_queue() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SqliteProvider::new(dir.path().join("shared.db"));
        let one = provider.connect().unwrap();
        let two = provider.connect().unwrap();
        one.submit(NewTask::new("ev", Opcode::NoOp, 1, 0, SUBID_CLI)).unwrap();

        let got = two.activate_first_ready(5, &claim("b")).unwrap();
        assert!(got.is_some());
        assert!(one.activate_first_ready(5, &claim("a")).unwrap().is_none());
    }
}
