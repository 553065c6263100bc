use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::{RunReport, RunStatus};

/// Entries kept in the persisted run log
pub const RUN_LOG_LIMIT: usize = 50;

/// Persisted scheduler record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub is_running: bool,
    pub current_recording_name: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub cron_expr: Option<String>,
    pub interval: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub run_log: Vec<RunLogEntry>,
}

impl ScheduleState {
    pub fn push_log(&mut self, entry: RunLogEntry) {
        self.run_log.push(entry);
        if self.run_log.len() > RUN_LOG_LIMIT {
            let excess = self.run_log.len() - RUN_LOG_LIMIT;
            self.run_log.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunLogStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// One recipe run in the schedule log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogEntry {
    pub recipe_id: String,
    pub recipe_name: String,
    pub status: RunLogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn from_report(report: &RunReport, finished_at: DateTime<Utc>) -> Self {
        let (status, failed_step, reason) = match &report.status {
            RunStatus::Succeeded => (RunLogStatus::Succeeded, None, None),
            RunStatus::Failed { step_index, reason } => {
                (RunLogStatus::Failed, Some(*step_index), Some(reason.clone()))
            }
            RunStatus::Cancelled => (RunLogStatus::Cancelled, None, None),
        };
        Self {
            recipe_id: report.recipe_id.clone(),
            recipe_name: report.recipe_name.clone(),
            status,
            failed_step,
            reason,
            finished_at,
        }
    }
}
