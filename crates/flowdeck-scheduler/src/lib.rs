//! # Flowdeck Scheduler
//!
//! Durable workflow storage plus a polling scheduler that runs saved
//! workflow graphs unattended, once at a given instant or on a fixed interval.
//!
//! ## Design Principles
//! - The store is the only source of truth; the scheduler keeps nothing
//!   that a restart would need to recover
//! - One polling loop per process, started lazily on first demand
//! - Failures in one workflow never abort a scan or stop the loop
//!
//! ## Architecture
//! ```text
//! WorkflowService (save / update / delete)
//!   ├── WorkflowStore ── FileWorkflowStore (one JSON file per workflow)
//!   │                └── SqliteWorkflowStore (rusqlite)
//!   └── on active schedule → SchedulerBootstrap::ensure_started()
//!
//! Scheduler (tokio interval)
//!   ├── list_due(now) from the store
//!   ├── WorkflowExecutor::run (bounded concurrency, timeout)
//!   │     ├── HttpExecutor (POST to executor service)
//!   │     └── LogExecutor
//!   └── write back lastFiredAt / enabled / lastRun → RunHistory
//! ```

pub mod bootstrap;
pub mod clock;
pub mod engine;
pub mod executor;
pub mod history;
pub mod persistence;
pub mod schedule;
pub mod service;
pub mod store;
pub mod workflow;

pub use bootstrap::SchedulerBootstrap;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ScanReport, Scheduler, SchedulerStatus};
pub use executor::{HttpExecutor, LogExecutor, WorkflowExecutor};
pub use history::{FireOutcome, RunHistory, RunRecord};
pub use persistence::SqliteWorkflowStore;
pub use schedule::{LastRun, RunStatus, ScheduleDescriptor, ScheduleType};
pub use service::WorkflowService;
pub use store::{FileWorkflowStore, WorkflowStore, open_store};
pub use workflow::{
    NewWorkflow, WorkflowDefinition, WorkflowEdge, WorkflowGraph, WorkflowNode, WorkflowPatch,
    WorkflowSummary,
};
