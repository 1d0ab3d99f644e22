//! Workflow store contract and the file-per-record backend.
//! Each workflow is one pretty-printed JSON file.
//! Reads always hit disk: no cache between the scheduler and user edits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowdeck_core::config::{StoreBackend, StoreConfig};
use flowdeck_core::{FlowError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::Clock;
use crate::persistence::SqliteWorkflowStore;
use crate::workflow::{
    NewWorkflow, WorkflowDefinition, WorkflowPatch, WorkflowSummary, is_valid_id, new_workflow_id,
};

/// Durable CRUD over workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Validate, assign an id and timestamps, persist.
    async fn create(&self, new: NewWorkflow) -> Result<WorkflowDefinition>;

    async fn get(&self, id: &str) -> Result<WorkflowDefinition>;

    /// Summaries, most recently updated first.
    async fn list(&self) -> Result<Vec<WorkflowSummary>>;

    /// Read-modify-write of the fields set in `patch`; stamps `updated_at`.
    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<WorkflowDefinition>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Enabled workflows whose next fire instant is `<= now`, soonest first.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowDefinition>>;
}

/// Keep the due ones, ordered by next fire instant then id.
pub(crate) fn select_due(
    defs: impl IntoIterator<Item = WorkflowDefinition>,
    now: DateTime<Utc>,
) -> Vec<WorkflowDefinition> {
    let mut due: Vec<_> = defs.into_iter().filter(|d| d.is_due(now)).collect();
    due.sort_by(|a, b| {
        a.next_fire_at()
            .cmp(&b.next_fire_at())
            .then_with(|| a.id.cmp(&b.id))
    });
    due
}

/// Newest `updated_at` first.
pub(crate) fn sort_summaries(summaries: &mut [WorkflowSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

/// Open the backend named in config.
///
/// The sqlite backend treats `path` as the database file (`.db` is added
/// when the path has no extension).
pub fn open_store(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn WorkflowStore>> {
    let path = config.resolved_path();
    match config.backend {
        StoreBackend::File => {
            tracing::info!("📂 Workflow store: {}", path.display());
            Ok(Arc::new(FileWorkflowStore::new(&path, clock)?))
        }
        StoreBackend::Sqlite => {
            let path = if path.extension().is_none() {
                path.with_extension("db")
            } else {
                path
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(unavailable)?;
            }
            tracing::info!("💾 Workflow store: {} (sqlite)", path.display());
            Ok(Arc::new(SqliteWorkflowStore::open(&path, clock)?))
        }
    }
}

fn unavailable(e: std::io::Error) -> FlowError {
    FlowError::StoreUnavailable(e.to_string())
}

/// File-based workflow store: `<dir>/<id>.json`.
pub struct FileWorkflowStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    /// Serializes writers so read-modify-write is atomic per record.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileWorkflowStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn new(dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(unavailable)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            clock,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(FlowError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<WorkflowDefinition> {
        let path = self.path_for(id)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowError::NotFound(id.to_string()));
            }
            Err(e) => return Err(unavailable(e)),
        };
        let def: WorkflowDefinition = serde_json::from_str(&json)?;
        Ok(with_file_id(def, id))
    }

    /// Write through a temp file so readers never see a half-written record.
    async fn write(&self, def: &WorkflowDefinition) -> Result<()> {
        let path = self.path_for(&def.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", def.id));
        let json = serde_json::to_string_pretty(def)?;
        tokio::fs::write(&tmp, json).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;
        tracing::debug!("💾 Saved workflow {} to {}", def.id, path.display());
        Ok(())
    }

    /// Every readable record. Unparseable files are skipped.
    async fn load_all(&self) -> Result<Vec<WorkflowDefinition>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(e)),
        };

        let mut defs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|json| {
                    serde_json::from_str::<WorkflowDefinition>(&json).map_err(|e| e.to_string())
                });
            let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
            match (parsed, stem) {
                (Ok(def), Some(stem)) if is_valid_id(&stem) => defs.push(with_file_id(def, &stem)),
                (Ok(_), _) => tracing::warn!("⚠️ Skipping workflow with unusable file name {}", path.display()),
                (Err(e), _) => tracing::warn!("⚠️ Skipping unreadable workflow {}: {e}", path.display()),
            }
        }
        Ok(defs)
    }
}

/// The file name is the record's identity; a mismatched `id` inside is replaced.
fn with_file_id(mut def: WorkflowDefinition, id: &str) -> WorkflowDefinition {
    if def.id != id {
        tracing::warn!("⚠️ Workflow file {id}.json carries id '{}', using {id}", def.id);
        def.id = id.to_string();
    }
    def
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn create(&self, new: NewWorkflow) -> Result<WorkflowDefinition> {
        new.validate()?;
        let _guard = self.write_lock.lock().await;

        let mut id = new_workflow_id();
        while tokio::fs::try_exists(self.path_for(&id)?).await.map_err(unavailable)? {
            id = new_workflow_id();
        }
        let def = WorkflowDefinition::from_new(id, new, self.clock.now());
        self.write(&def).await?;
        tracing::debug!("📝 Workflow saved: '{}' ({})", def.name, def.id);
        Ok(def)
    }

    async fn get(&self, id: &str) -> Result<WorkflowDefinition> {
        self.read(id).await
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        let mut summaries: Vec<_> = self
            .load_all()
            .await?
            .iter()
            .map(WorkflowSummary::from)
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<WorkflowDefinition> {
        let _guard = self.write_lock.lock().await;
        let mut def = self.read(id).await?;
        patch.apply(&mut def)?;
        def.touch(self.clock.now());
        self.write(&def).await?;
        Ok(def)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("🗑️ Workflow deleted: {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FlowError::NotFound(id.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowDefinition>> {
        Ok(select_due(self.load_all().await?, now))
    }
}
