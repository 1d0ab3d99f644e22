//! Run history: what the scheduler fired recently.
//! In-memory only: the store keeps `lastRun` per workflow, this keeps the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleType;

const MAX_HISTORY: usize = 100;

/// How a single firing ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum FireOutcome {
    /// Executor succeeded and the schedule was updated.
    Fired,
    /// Executor failed; the schedule was still advanced.
    Failed(String),
    /// The schedule could not be updated (deleted mid-scan, store error).
    Skipped(String),
}

/// One entry in the history feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub workflow_id: String,
    pub workflow_name: String,
    pub schedule_type: ScheduleType,
    #[serde(flatten)]
    pub outcome: FireOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Ring buffer of recent runs.
#[derive(Debug, Default)]
pub struct RunHistory {
    records: Vec<RunRecord>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run, dropping the oldest past the cap.
    pub fn record(&mut self, record: RunRecord) {
        self.records.push(record);
        if self.records.len() > MAX_HISTORY {
            self.records.remove(0);
        }
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Most recent first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<RunRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> RunRecord {
        RunRecord {
            workflow_id: format!("workflow-{i}"),
            workflow_name: "wf".into(),
            schedule_type: ScheduleType::Recurring,
            outcome: FireOutcome::Fired,
            started_at: Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_ring_buffer_cap() {
        let mut history = RunHistory::new();
        for i in 0..150 {
            history.record(record(i));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.records()[0].workflow_id, "workflow-50");
        assert_eq!(history.recent(1)[0].workflow_id, "workflow-149");
    }

    #[test]
    fn test_outcome_serialization() {
        let mut r = record(1);
        r.outcome = FireOutcome::Failed("node 'write' timed out".into());
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "node 'write' timed out");
        assert_eq!(json["schedule_type"], "recurring");
    }
}
