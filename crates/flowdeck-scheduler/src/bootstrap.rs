//! Bootstrap guard: one scheduler per process, started on first demand.
//!
//! Owned by the composition root (the gateway's `AppState`, or `main`).
//! Both the init endpoint and every save with an enabled schedule call
//! [`SchedulerBootstrap::ensure_started`]; whichever comes first wins.

use std::sync::{Arc, OnceLock};

use flowdeck_core::config::SchedulerConfig;

use crate::clock::Clock;
use crate::engine::Scheduler;
use crate::executor::WorkflowExecutor;
use crate::store::WorkflowStore;

type Factory = Box<dyn Fn() -> Scheduler + Send + Sync>;

/// Lazily constructs and starts the process-wide [`Scheduler`].
pub struct SchedulerBootstrap {
    factory: Factory,
    scheduler: OnceLock<Arc<Scheduler>>,
}

impl SchedulerBootstrap {
    /// Bootstrap with a custom constructor.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Scheduler + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            scheduler: OnceLock::new(),
        }
    }

    /// Bootstrap that builds the scheduler from its collaborators.
    pub fn from_parts(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn WorkflowExecutor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self::new(move || Scheduler::new(store.clone(), executor.clone(), clock.clone(), &config))
    }

    /// The scheduler, constructing it (but not starting it) if needed.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler
            .get_or_init(|| Arc::new((self.factory)()))
            .clone()
    }

    /// The scheduler if it has been constructed.
    pub fn existing(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.get().cloned()
    }

    /// Construct if needed, start if not running. Never fails.
    pub fn ensure_started(&self) -> Arc<Scheduler> {
        let scheduler = self.scheduler();
        if scheduler.is_running() {
            tracing::debug!("⏰ Scheduler already running");
        } else {
            scheduler.start();
        }
        scheduler
    }

    pub fn is_running(&self) -> bool {
        self.existing().is_some_and(|s| s.is_running())
    }
}
