//! Post-recording edits
//!
//! Editing a step's identification descriptors drops its visual capture,
//! since the cached crop would describe the old target. Value and label
//! edits leave the visual capture alone.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{Identification, Recipe, StepType, Visual, REDACTED_SENTINEL};
use crate::error::{ReplayError, ReplayResult};

/// A single field edit applied to one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum StepEdit {
    Identification(Identification),
    Type { step_type: StepType },
    /// New literal value; `None` clears it
    Value { value: Option<String> },
    /// Replace the value with the redaction sentinel so it is prompted at run time
    Redact { field_label: String },
    FieldLabel { field_label: Option<String> },
}

impl Recipe {
    fn check_index(&self, index: usize) -> ReplayResult<()> {
        if index >= self.steps.len() {
            return Err(ReplayError::StepIndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }

    /// Move a step; timestamps are reassigned in the new order
    pub fn move_step(&mut self, from: usize, to: usize) -> ReplayResult<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }

        let mut stamps: Vec<i64> = self.steps.iter().map(|s| s.timestamp).collect();
        stamps.sort_unstable();

        let step = self.steps.remove(from);
        self.steps.insert(to, step);

        for (step, ts) in self.steps.iter_mut().zip(stamps) {
            step.timestamp = ts;
        }
        self.touch();
        Ok(())
    }

    /// Delete a step; the last step cannot be removed
    pub fn delete_step(&mut self, index: usize) -> ReplayResult<()> {
        self.check_index(index)?;
        if self.steps.len() == 1 {
            return Err(ReplayError::InvalidRecipe(
                "cannot delete the only step of a recipe".into(),
            ));
        }
        self.steps.remove(index);
        self.touch();
        Ok(())
    }

    pub fn edit_step(&mut self, index: usize, edit: StepEdit) -> ReplayResult<()> {
        self.check_index(index)?;
        let step = &mut self.steps[index];

        match edit {
            StepEdit::Identification(identification) => {
                if identification != step.identification {
                    step.identification = identification;
                    step.visual = Visual::NotRecorded;
                }
            }
            StepEdit::Type { step_type } => {
                if step_type == StepType::Click && step.is_redacted() {
                    return Err(ReplayError::InvalidRecipe(
                        "a redacted step cannot become a click".into(),
                    ));
                }
                step.step_type = step_type;
            }
            StepEdit::Value { value } => {
                let literal = value.as_deref().map_or(false, |v| v != REDACTED_SENTINEL);
                if step.is_redacted() && literal {
                    return Err(ReplayError::SecretNotPersisted { index });
                }
                step.value = value;
            }
            StepEdit::Redact { field_label } => {
                if step.step_type == StepType::Click {
                    return Err(ReplayError::InvalidRecipe(
                        "click steps have no value to redact".into(),
                    ));
                }
                step.value = Some(REDACTED_SENTINEL.to_string());
                step.field_label = Some(field_label);
            }
            StepEdit::FieldLabel { field_label } => {
                step.field_label = field_label;
            }
        }

        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
