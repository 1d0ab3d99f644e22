//! SQLite-backed workflow store.
//! Schedule fields live in their own columns; the graph is stored as JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowdeck_core::{FlowError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::schedule::{LastRun, ScheduleDescriptor, ScheduleType};
use crate::store::{WorkflowStore, select_due, sort_summaries};
use crate::workflow::{
    NewWorkflow, WorkflowDefinition, WorkflowGraph, WorkflowPatch, WorkflowSummary,
    new_workflow_id,
};

const COLUMNS: &str = "id, name, description, graph, schedule_type, schedule_enabled, \
     execute_at, interval_secs, last_fired_at, last_run, created_at, updated_at";

/// SQLite persistence for workflow definitions.
pub struct SqliteWorkflowStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

fn db_err(e: rusqlite::Error) -> FlowError {
    FlowError::StoreUnavailable(e.to_string())
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn type_name(t: ScheduleType) -> &'static str {
    match t {
        ScheduleType::None => "none",
        ScheduleType::Deferred => "deferred",
        ScheduleType::Recurring => "recurring",
    }
}

/// Raw row, decoded outside the rusqlite closure so JSON errors surface.
struct Row {
    id: String,
    name: String,
    description: String,
    graph: String,
    schedule_type: String,
    schedule_enabled: bool,
    execute_at: Option<String>,
    interval_secs: Option<i64>,
    last_fired_at: Option<String>,
    last_run: Option<String>,
    created_at: String,
    updated_at: String,
}

impl Row {
    fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            graph: row.get(3)?,
            schedule_type: row.get(4)?,
            schedule_enabled: row.get::<_, i32>(5)? != 0,
            execute_at: row.get(6)?,
            interval_secs: row.get(7)?,
            last_fired_at: row.get(8)?,
            last_run: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn decode(self) -> Result<WorkflowDefinition> {
        let graph: WorkflowGraph = serde_json::from_str(&self.graph)?;
        let schedule_type = match self.schedule_type.as_str() {
            "deferred" => ScheduleType::Deferred,
            "recurring" => ScheduleType::Recurring,
            _ => ScheduleType::None,
        };
        let last_run: Option<LastRun> = match self.last_run {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let created_at = parse_ts(&self.created_at).ok_or_else(|| {
            FlowError::StoreUnavailable(format!("bad created_at for {}", self.id))
        })?;
        let updated_at = parse_ts(&self.updated_at).unwrap_or(created_at);

        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            graph,
            schedule: ScheduleDescriptor {
                schedule_type,
                enabled: self.schedule_enabled,
                execute_at: self.execute_at.as_deref().and_then(parse_ts),
                interval_secs: self.interval_secs.and_then(|s| u64::try_from(s).ok()),
                last_fired_at: self.last_fired_at.as_deref().and_then(parse_ts),
                last_run,
            },
            created_at,
            updated_at,
        })
    }
}

impl SqliteWorkflowStore {
    /// Open or create the workflow database. `:memory:` works for tests.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self {
            conn: Mutex::new(conn),
            clock,
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::StoreUnavailable(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                graph TEXT NOT NULL,                 -- JSON: {nodes, edges}
                schedule_type TEXT NOT NULL DEFAULT 'none',
                schedule_enabled INTEGER NOT NULL DEFAULT 0,
                execute_at TEXT,
                interval_secs INTEGER,
                last_fired_at TEXT,
                last_run TEXT,                       -- JSON: {status, at, message}
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_workflows_enabled ON workflows(schedule_enabled);
            ",
        )
        .map_err(|e| FlowError::StoreUnavailable(format!("Migration: {e}")))?;
        Ok(())
    }

    fn upsert(conn: &Connection, def: &WorkflowDefinition) -> Result<()> {
        let graph = serde_json::to_string(&def.graph)?;
        let last_run = def
            .schedule
            .last_run
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO workflows ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                def.id,
                def.name,
                def.description,
                graph,
                type_name(def.schedule.schedule_type),
                def.schedule.enabled as i32,
                def.schedule.execute_at.map(|t| t.to_rfc3339()),
                def.schedule.interval_secs.and_then(|s| i64::try_from(s).ok()),
                def.schedule.last_fired_at.map(|t| t.to_rfc3339()),
                last_run,
                def.created_at.to_rfc3339(),
                def.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn fetch(conn: &Connection, id: &str) -> Result<WorkflowDefinition> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM workflows WHERE id = ?1"),
                [id],
                Row::from_sql,
            )
            .optional()
            .map_err(db_err)?;
        match row {
            Some(row) => row.decode(),
            None => Err(FlowError::NotFound(id.to_string())),
        }
    }

    /// Rows matching `filter`; undecodable rows are skipped with a warning.
    fn query(conn: &Connection, filter: &str) -> Result<Vec<WorkflowDefinition>> {
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM workflows {filter}"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], Row::from_sql)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                row.decode()
                    .map_err(|e| tracing::warn!("⚠️ Skipping unreadable workflow {id}: {e}"))
                    .ok()
            })
            .collect())
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn create(&self, new: NewWorkflow) -> Result<WorkflowDefinition> {
        new.validate()?;
        let conn = self.lock()?;
        let mut id = new_workflow_id();
        while conn
            .query_row("SELECT 1 FROM workflows WHERE id = ?1", [&id], |_| Ok(()))
            .optional()
            .map_err(db_err)?
            .is_some()
        {
            id = new_workflow_id();
        }
        let def = WorkflowDefinition::from_new(id, new, self.clock.now());
        Self::upsert(&conn, &def)?;
        tracing::debug!("📝 Workflow saved: '{}' ({})", def.name, def.id);
        Ok(def)
    }

    async fn get(&self, id: &str) -> Result<WorkflowDefinition> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        let conn = self.lock()?;
        let mut summaries: Vec<_> = Self::query(&conn, "")?
            .iter()
            .map(WorkflowSummary::from)
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<WorkflowDefinition> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut def = Self::fetch(&tx, id)?;
        patch.apply(&mut def)?;
        def.touch(self.clock.now());
        Self::upsert(&tx, &def)?;
        tx.commit().map_err(db_err)?;
        Ok(def)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM workflows WHERE id = ?1", [id])
            .map_err(db_err)?;
        if removed == 0 {
            return Err(FlowError::NotFound(id.to_string()));
        }
        tracing::debug!("🗑️ Workflow deleted: {id}");
        Ok(())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowDefinition>> {
        let conn = self.lock()?;
        let candidates = Self::query(
            &conn,
            "WHERE schedule_enabled = 1 AND schedule_type != 'none'",
        )?;
        Ok(select_due(candidates, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schedule::RunStatus;
    use crate::workflow::WorkflowNode;
    use chrono::{TimeDelta, TimeZone};
    use std::path::PathBuf;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn temp_db() -> (SqliteWorkflowStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = SqliteWorkflowStore::open(&PathBuf::from(":memory:"), clock.clone()).unwrap();
        (store, clock)
    }

    fn new_wf(name: &str, schedule: ScheduleDescriptor) -> NewWorkflow {
        let mut node = WorkflowNode::new("n1");
        node.extra.insert("type".into(), serde_json::json!("ai-analysis"));
        NewWorkflow::new(name, WorkflowGraph::new(vec![node], vec![])).with_schedule(schedule)
    }

    #[tokio::test]
    async fn test_open_and_migrate() {
        let (store, _clock) = temp_db();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.list_due(t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let (store, _clock) = temp_db();
        let created = store
            .create(new_wf("deferred", ScheduleDescriptor::deferred(t0() + TimeDelta::minutes(5))))
            .await
            .unwrap();
        let loaded = store.get(&created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.graph.nodes[0].kind(), Some("ai-analysis"));
    }

    #[tokio::test]
    async fn test_update_last_run_and_enabled() {
        let (store, clock) = temp_db();
        let def = store
            .create(new_wf("once", ScheduleDescriptor::deferred(t0())))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(1));
        let run = LastRun {
            status: RunStatus::Failed,
            at: clock.now(),
            message: Some("boom".into()),
        };
        let updated = store
            .update(
                &def.id,
                WorkflowPatch::default().enabled(false).last_run(run.clone()),
            )
            .await
            .unwrap();
        assert!(!updated.schedule.enabled);
        assert_eq!(updated.updated_at, t0() + TimeDelta::seconds(1));

        let loaded = store.get(&def.id).await.unwrap();
        assert_eq!(loaded.schedule.last_run, Some(run));
        assert!(store.list_due(clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_paths() {
        let (store, _clock) = temp_db();
        assert!(store.get("nope").await.unwrap_err().is_not_found());
        assert!(store
            .update("nope", WorkflowPatch::default().enabled(false))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store.delete("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_due_and_order() {
        let (store, clock) = temp_db();
        let recurring = store
            .create(new_wf("r", ScheduleDescriptor::recurring(30)))
            .await
            .unwrap();
        let deferred = store
            .create(new_wf("d", ScheduleDescriptor::deferred(t0() + TimeDelta::seconds(10))))
            .await
            .unwrap();
        store.create(new_wf("n", ScheduleDescriptor::none())).await.unwrap();

        clock.advance(TimeDelta::seconds(30));
        let due = store.list_due(clock.now()).await.unwrap();
        let ids: Vec<_> = due.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![deferred.id.clone(), recurring.id.clone()]);

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 3);
    }
}
