//! Schedule descriptors: whether and how a workflow runs unattended.

use chrono::{DateTime, TimeDelta, Utc};
use flowdeck_core::{FlowError, Result};
use serde::{Deserialize, Serialize};

/// How a workflow is triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Never runs unattended.
    #[default]
    None,
    /// Runs once at `execute_at`.
    Deferred,
    /// Runs every `interval` seconds.
    Recurring,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::None => write!(f, "none"),
            ScheduleType::Deferred => write!(f, "deferred"),
            ScheduleType::Recurring => write!(f, "recurring"),
        }
    }
}

/// Outcome of a scheduler-driven run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Stored status of the most recent firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub status: RunStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Schedule embedded in every workflow definition.
///
/// `last_fired_at` and `last_run` belong to the scheduler; user edits go
/// through [`ScheduleDescriptor::merge_user_edit`] which never touches them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDescriptor {
    #[serde(rename = "type", default)]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_at: Option<DateTime<Utc>>,
    /// Seconds between firings of a recurring schedule.
    #[serde(rename = "interval", default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

impl ScheduleDescriptor {
    /// No unattended execution.
    pub fn none() -> Self {
        Self::default()
    }

    /// Enabled one-shot schedule.
    pub fn deferred(at: DateTime<Utc>) -> Self {
        Self {
            schedule_type: ScheduleType::Deferred,
            enabled: true,
            execute_at: Some(at),
            ..Self::default()
        }
    }

    /// Enabled fixed-interval schedule.
    pub fn recurring(every_secs: u64) -> Self {
        Self {
            schedule_type: ScheduleType::Recurring,
            enabled: true,
            interval_secs: Some(every_secs),
            ..Self::default()
        }
    }

    /// Whether the scheduler should consider this descriptor at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.schedule_type != ScheduleType::None
    }

    /// Interval as a duration, if positive and representable.
    pub fn interval(&self) -> Option<TimeDelta> {
        let secs = self.interval_secs.filter(|s| *s > 0)?;
        TimeDelta::try_seconds(i64::try_from(secs).ok()?)
    }

    /// Reject schedules the scheduler could never act on.
    pub fn validate(&self) -> Result<()> {
        match self.schedule_type {
            ScheduleType::None => Ok(()),
            ScheduleType::Deferred if self.execute_at.is_none() => Err(FlowError::validation(
                "Deferred schedule requires executeAt",
            )),
            ScheduleType::Deferred => Ok(()),
            ScheduleType::Recurring if self.interval().is_none() => Err(FlowError::validation(
                "Recurring schedule requires a positive interval",
            )),
            ScheduleType::Recurring => Ok(()),
        }
    }

    /// `type = none` is stored disabled.
    pub fn normalized(mut self) -> Self {
        if self.schedule_type == ScheduleType::None {
            self.enabled = false;
        }
        self
    }

    /// Apply a user-supplied schedule, keeping scheduler-maintained fields.
    pub fn merge_user_edit(&mut self, edit: ScheduleDescriptor) {
        let last_fired_at = self.last_fired_at.take();
        let last_run = self.last_run.take();
        *self = ScheduleDescriptor {
            last_fired_at,
            last_run,
            ..edit
        }
        .normalized();
    }

    /// Next instant this schedule becomes eligible to fire.
    ///
    /// `baseline` is used for a recurring schedule that has never fired
    /// (the workflow's `updated_at`).
    pub fn next_fire_at(&self, baseline: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_active() {
            return None;
        }
        match self.schedule_type {
            ScheduleType::None => None,
            ScheduleType::Deferred => self.execute_at,
            ScheduleType::Recurring => {
                let interval = self.interval()?;
                self.last_fired_at
                    .unwrap_or(baseline)
                    .checked_add_signed(interval)
            }
        }
    }

    /// Whether the schedule is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, baseline: DateTime<Utc>) -> bool {
        self.next_fire_at(baseline).is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_none_is_never_due() {
        let mut s = ScheduleDescriptor::none();
        s.enabled = true;
        s.execute_at = Some(t0());
        s.interval_secs = Some(1);
        assert!(!s.is_active());
        assert!(!s.is_due(t0() + TimeDelta::days(365), t0()));
    }

    #[test]
    fn test_deferred_due_at_execute_at() {
        let at = t0() + TimeDelta::seconds(5);
        let s = ScheduleDescriptor::deferred(at);
        assert!(!s.is_due(t0(), t0()));
        assert!(s.is_due(at, t0()));
        assert!(s.is_due(at + TimeDelta::hours(1), t0()));
    }

    #[test]
    fn test_disabled_deferred_not_due() {
        let mut s = ScheduleDescriptor::deferred(t0());
        s.enabled = false;
        assert!(!s.is_due(t0() + TimeDelta::days(1), t0()));
    }

    #[test]
    fn test_recurring_window() {
        let mut s = ScheduleDescriptor::recurring(60);
        // Never fired: baseline + interval.
        assert!(!s.is_due(t0() + TimeDelta::seconds(59), t0()));
        assert!(s.is_due(t0() + TimeDelta::seconds(60), t0()));

        let fired = t0() + TimeDelta::seconds(60);
        s.last_fired_at = Some(fired);
        for eps in [0, 1, 30, 59] {
            assert!(!s.is_due(fired + TimeDelta::seconds(eps), t0()), "eps={eps}");
        }
        assert!(s.is_due(fired + TimeDelta::seconds(60), t0()));
    }

    #[test]
    fn test_validation() {
        assert!(ScheduleDescriptor::none().validate().is_ok());
        assert!(ScheduleDescriptor::deferred(t0()).validate().is_ok());
        assert!(ScheduleDescriptor::recurring(30).validate().is_ok());

        let mut bad = ScheduleDescriptor::deferred(t0());
        bad.execute_at = None;
        assert!(matches!(bad.validate(), Err(FlowError::Validation(_))));

        assert!(ScheduleDescriptor::recurring(0).validate().is_err());
        let mut missing = ScheduleDescriptor::recurring(10);
        missing.interval_secs = None;
        assert!(missing.validate().is_err());
        assert!(ScheduleDescriptor::recurring(u64::MAX).validate().is_err());
    }

    #[test]
    fn test_merge_user_edit_keeps_scheduler_fields() {
        let mut s = ScheduleDescriptor::recurring(60);
        s.last_fired_at = Some(t0());
        s.last_run = Some(LastRun {
            status: RunStatus::Succeeded,
            at: t0(),
            message: None,
        });

        s.merge_user_edit(ScheduleDescriptor::recurring(120));
        assert_eq!(s.interval_secs, Some(120));
        assert_eq!(s.last_fired_at, Some(t0()));
        assert!(s.last_run.is_some());

        let mut off = ScheduleDescriptor::none();
        off.enabled = true;
        s.merge_user_edit(off);
        assert!(!s.enabled);
        assert_eq!(s.last_fired_at, Some(t0()));
    }

    #[test]
    fn test_json_layout() {
        let json = serde_json::json!({
            "type": "deferred",
            "enabled": true,
            "executeAt": "2026-03-01T08:00:05Z"
        });
        let s: ScheduleDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(s.schedule_type, ScheduleType::Deferred);
        assert_eq!(s.execute_at, Some(t0() + TimeDelta::seconds(5)));

        let recurring = serde_json::to_value(ScheduleDescriptor::recurring(90)).unwrap();
        assert_eq!(recurring["type"], "recurring");
        assert_eq!(recurring["interval"], 90);
        assert!(recurring.get("lastFiredAt").is_none());

        let empty: ScheduleDescriptor = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, ScheduleDescriptor::none());
    }
}
