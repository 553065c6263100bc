use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capability::ExtractedTables;
use crate::recipe::{Recipe, StepType};
use crate::resolver::Strategy;

/// Observable state of the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PlayerState {
    Idle,
    Running {
        step: usize,
    },
    Retrying {
        step: usize,
        attempt: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
    },
    Prompting {
        step: usize,
        #[serde(rename = "fieldLabel")]
        field_label: String,
    },
    Succeeded,
    Failed {
        step: usize,
        reason: String,
    },
    Cancelled,
}

impl PlayerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerState::Succeeded | PlayerState::Failed { .. } | PlayerState::Cancelled
        )
    }
}

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed { strategy: Strategy },
    Failed { error: String },
    Skipped { reason: String },
    Retrying { attempt: u32, max_attempts: u32 },
}

/// State for a single step execution
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub step_type: StepType,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<Instant>,
    pub duration_ms: Option<u64>,
    pub attempts: u32,
}

impl StepState {
    pub fn new(index: usize, step_type: StepType, description: String) -> Self {
        Self {
            index,
            step_type,
            description,
            status: StepStatus::Pending,
            started_at: None,
            duration_ms: None,
            attempts: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn retry(&mut self, attempt: u32, max_attempts: u32) {
        self.status = StepStatus::Retrying {
            attempt,
            max_attempts,
        };
    }

    pub fn pass(&mut self, strategy: Strategy) {
        self.finish(StepStatus::Passed { strategy });
    }

    pub fn fail(&mut self, error: String) {
        self.finish(StepStatus::Failed { error });
    }

    pub fn skip(&mut self, reason: &str) {
        self.status = StepStatus::Skipped {
            reason: reason.to_string(),
        };
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    pub fn to_report(&self) -> StepOutcome {
        StepOutcome {
            index: self.index,
            step_type: self.step_type,
            description: self.description.clone(),
            status: self.status.clone(),
            attempts: self.attempts,
            duration_ms: self.duration_ms,
        }
    }
}

/// Per-step record in a run report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub index: usize,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub description: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunStatus {
    Succeeded,
    Failed {
        #[serde(rename = "stepIndex")]
        step_index: usize,
        reason: String,
    },
    Cancelled,
}

/// State for one recipe run
#[derive(Debug, Clone)]
pub struct RunState {
    pub recipe_id: String,
    pub recipe_name: String,
    pub steps: Vec<StepState>,
    pub current_index: usize,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl RunState {
    pub fn new(recipe: &Recipe) -> Self {
        let steps = recipe
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| StepState::new(i, s.step_type, s.describe()))
            .collect();

        Self {
            recipe_id: recipe.id.clone(),
            recipe_name: recipe.name.clone(),
            steps,
            current_index: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn current_step(&mut self) -> Option<&mut StepState> {
        self.steps.get_mut(self.current_index)
    }

    pub fn skip_remaining(&mut self, reason: &str) {
        for step in &mut self.steps[self.current_index..] {
            if matches!(step.status, StepStatus::Pending) {
                step.skip(reason);
            }
        }
    }

    pub fn finish(&self, status: RunStatus, extracted: Option<ExtractedTables>) -> RunReport {
        RunReport {
            recipe_id: self.recipe_id.clone(),
            recipe_name: self.recipe_name.clone(),
            status,
            steps: self.steps.iter().map(|s| s.to_report()).collect(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            extracted,
        }
    }
}

/// Outcome of one recipe run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub recipe_id: String,
    pub recipe_name: String,
    pub status: RunStatus,
    pub steps: Vec<StepOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedTables>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn passed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Passed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{recipe, step};

    #[test]
    fn test_skip_remaining_marks_only_pending() {
        let r = recipe(vec![
            step(StepType::Click, 1, "A"),
            step(StepType::Click, 2, "B"),
            step(StepType::Click, 3, "C"),
        ]);
        let mut run = RunState::new(&r);
        run.steps[0].start();
        run.steps[0].pass(Strategy::TextRole);
        run.current_index = 1;
        run.steps[1].start();
        run.steps[1].fail("no strategy matched step 1".into());
        run.skip_remaining("previous step failed");

        let report = run.finish(
            RunStatus::Failed {
                step_index: 1,
                reason: "no strategy matched step 1".into(),
            },
            None,
        );
        assert_eq!(report.passed(), 1);
        assert!(matches!(report.steps[1].status, StepStatus::Failed { .. }));
        assert!(matches!(report.steps[2].status, StepStatus::Skipped { .. }));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let r = recipe(vec![step(StepType::Click, 1, "A")]);
        let report = RunState::new(&r).finish(
            RunStatus::Failed {
                step_index: 0,
                reason: "x".into(),
            },
            None,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["type"], "failed");
        assert_eq!(json["status"]["stepIndex"], 0);
        assert!(json.get("extracted").is_none());
        assert_eq!(json["steps"][0]["type"], "click");
    }

    #[test]
    fn test_terminal_states() {
        assert!(PlayerState::Cancelled.is_terminal());
        assert!(!PlayerState::Running { step: 0 }.is_terminal());
    }
}
