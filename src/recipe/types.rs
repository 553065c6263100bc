use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, ReplayResult};

/// Fixed marker stored in place of a captured secret
pub const REDACTED_SENTINEL: &str = "__PORTAL_REPLAY_REDACTED__";

/// Kind of interaction a step replays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Click,
    Input,
    Select,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::Click => write!(f, "click"),
            StepType::Input => write!(f, "input"),
            StepType::Select => write!(f, "select"),
        }
    }
}

/// Text and accessibility descriptors of the recorded target
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Identification {
    /// Descriptors in the order the text strategy tries them
    pub fn descriptors(&self) -> impl Iterator<Item = &str> {
        [&self.text, &self.aria_label, &self.placeholder, &self.title]
            .into_iter()
            .filter_map(|d| d.as_deref())
            .filter(|d| !d.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors().next().is_none()
    }
}

/// Position of the target within its form, plus surrounding text
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index: Option<usize>,
    #[serde(default)]
    pub nearby_text: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub width: f64,
    pub height: f64,
}

/// Cropped screenshot and generated description of the target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualCapture {
    /// Base64-encoded PNG crop
    pub screenshot: String,
    pub ai_description: String,
    pub bounding_box: BoundingBox,
}

/// Visual descriptor of a step; stored as an optional object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<VisualCapture>", into = "Option<VisualCapture>")]
pub enum Visual {
    #[default]
    NotRecorded,
    Recorded(VisualCapture),
}

impl Visual {
    pub fn capture(&self) -> Option<&VisualCapture> {
        match self {
            Visual::NotRecorded => None,
            Visual::Recorded(capture) => Some(capture),
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, Visual::Recorded(_))
    }
}

impl From<Option<VisualCapture>> for Visual {
    fn from(value: Option<VisualCapture>) -> Self {
        value.map(Visual::Recorded).unwrap_or_default()
    }
}

impl From<Visual> for Option<VisualCapture> {
    fn from(value: Visual) -> Self {
        match value {
            Visual::NotRecorded => None,
            Visual::Recorded(capture) => Some(capture),
        }
    }
}

/// Pointer position and target element center, in viewport coordinates
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub element_x: f64,
    pub element_y: f64,
}

/// One recorded interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub identification: Identification,
    #[serde(default)]
    pub context: StepContext,
    #[serde(default)]
    pub visual: Visual,
    pub coordinates: Coordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
}

impl Step {
    /// Whether the value must be supplied by the credential prompt
    pub fn is_redacted(&self) -> bool {
        self.value.as_deref() == Some(REDACTED_SENTINEL)
    }

    /// Label shown when prompting for the step's value
    pub fn prompt_label(&self) -> String {
        self.field_label
            .clone()
            .or_else(|| self.identification.descriptors().next().map(str::to_string))
            .unwrap_or_else(|| "Password".to_string())
    }

    /// Short human description, safe to log
    pub fn describe(&self) -> String {
        let target = self
            .identification
            .descriptors()
            .next()
            .map(|d| format!("'{}'", d))
            .unwrap_or_else(|| {
                format!(
                    "({:.0}, {:.0})",
                    self.coordinates.element_x, self.coordinates.element_y
                )
            });

        match (&self.step_type, self.is_redacted()) {
            (StepType::Click, _) => format!("click {}", target),
            (t, true) => format!("{} {} = <{}>", t, target, self.prompt_label()),
            (t, false) => format!("{} {}", t, target),
        }
    }
}

/// A named, ordered list of steps recorded against one site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    pub url: String,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether scheduled runs include this recipe
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Recipe {
    pub fn new(name: &str, institution: Option<String>, url: &str, steps: Vec<Step>) -> ReplayResult<Self> {
        let now = Utc::now();
        let recipe = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            institution,
            url: url.to_string(),
            steps,
            created_at: now,
            updated_at: now,
            schedule_enabled: true,
        };
        recipe.validate()?;
        Ok(recipe)
    }

    /// Check the structural invariants of a recipe
    pub fn validate(&self) -> ReplayResult<()> {
        if self.steps.is_empty() {
            return Err(ReplayError::EmptyRecording);
        }
        if self.name.trim().is_empty() {
            return Err(ReplayError::InvalidRecipe("name is empty".into()));
        }
        for (i, pair) in self.steps.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ReplayError::InvalidRecipe(format!(
                    "step {} timestamp {} is not after step {} timestamp {}",
                    i + 1,
                    pair[1].timestamp,
                    i,
                    pair[0].timestamp
                )));
            }
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.is_redacted() && step.step_type == StepType::Click {
                return Err(ReplayError::InvalidRecipe(format!(
                    "click step {} carries a redacted value",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        match &self.institution {
            Some(inst) => format!("{} ({})", self.name, inst),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::step;

    #[test]
    fn test_visual_absent_field_deserializes_as_not_recorded() {
        let json = r#"{"type":"click","timestamp":1,"coordinates":{"x":1,"y":2,"elementX":3,"elementY":4}}"#;
        let s: Step = serde_json::from_str(json).unwrap();
        assert_eq!(s.visual, Visual::NotRecorded);
        assert!(s.context.nearby_text.is_empty());

        let out = serde_json::to_value(&s).unwrap();
        assert!(out["visual"].is_null());
        assert_eq!(out["coordinates"]["elementX"], 3.0);
    }

    #[test]
    fn test_visual_present_round_trips_through_option() {
        let mut s = step(StepType::Click, 1, "Login");
        s.visual = Visual::Recorded(VisualCapture {
            screenshot: "iVBOR".into(),
            ai_description: "blue Login button".into(),
            bounding_box: BoundingBox {
                width: 80.0,
                height: 30.0,
            },
        });
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("aiDescription"));
        let back: Step = serde_json::from_str(&json).unwrap();
        assert!(back.visual.is_recorded());
    }

    #[test]
    fn test_validate_rejects_non_increasing_timestamps() {
        let steps = vec![step(StepType::Click, 5, "A"), step(StepType::Click, 5, "B")];
        let err = Recipe::new("Bank", None, "https://bank.example", steps).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidRecipe(_)));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let err = Recipe::new("Bank", None, "https://bank.example", vec![]).unwrap_err();
        assert!(matches!(err, ReplayError::EmptyRecording));
    }

    #[test]
    fn test_describe_never_shows_secret_sentinel() {
        let mut s = step(StepType::Input, 1, "Password");
        s.value = Some(REDACTED_SENTINEL.into());
        s.field_label = Some("Online banking password".into());
        let text = s.describe();
        assert!(!text.contains(REDACTED_SENTINEL));
        assert!(text.contains("Online banking password"));
    }

    #[test]
    fn test_schedule_enabled_defaults_to_true() {
        let json = r#"{"id":"r1","name":"Bank","url":"https://b","steps":[],
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let r: Recipe = serde_json::from_str(json).unwrap();
        assert!(r.schedule_enabled);
    }
}
