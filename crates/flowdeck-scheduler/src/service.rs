//! Workflow service, the facade the gateway and CLI talk to.
//!
//! Wraps the store and owns the save trigger: any successful create or
//! update that leaves the workflow with an active schedule makes sure the
//! scheduler is running before the call returns.

use std::sync::Arc;

use flowdeck_core::Result;

use crate::bootstrap::SchedulerBootstrap;
use crate::store::WorkflowStore;
use crate::workflow::{NewWorkflow, WorkflowDefinition, WorkflowPatch, WorkflowSummary};

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    bootstrap: Arc<SchedulerBootstrap>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, bootstrap: Arc<SchedulerBootstrap>) -> Self {
        Self { store, bootstrap }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn bootstrap(&self) -> &Arc<SchedulerBootstrap> {
        &self.bootstrap
    }

    /// Create a workflow.
    pub async fn save(&self, new: NewWorkflow) -> Result<WorkflowDefinition> {
        let def = self.store.create(new).await?;
        tracing::info!(
            "💾 Saved workflow '{}' ({}) schedule={}",
            def.name,
            def.id,
            def.schedule.schedule_type
        );
        self.after_write(&def);
        Ok(def)
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowDefinition> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        self.store.list().await
    }

    pub async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<WorkflowDefinition> {
        let def = self.store.update(id, patch).await?;
        tracing::info!("✏️ Updated workflow '{}' ({})", def.name, def.id);
        self.after_write(&def);
        Ok(def)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        tracing::info!("🗑️ Deleted workflow {id}");
        Ok(())
    }

    fn after_write(&self, def: &WorkflowDefinition) {
        if def.schedule.is_active() {
            self.bootstrap.ensure_started();
        }
    }
}
