//! Turns raw interaction events into recipe steps
//!
//! Each descriptor group is captured independently and best-effort: text and
//! accessibility attributes, structural position, an optional visual crop,
//! and the coordinates, which are always present.

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use std::sync::LazyLock;

use crate::capability::VisionCapability;
use crate::driver::dom::normalize_text;
use crate::driver::{BrowserSession, InteractionEvent, InteractionKind, PageElement};
use crate::recipe::{
    BoundingBox, Coordinates, Identification, Step, StepContext, StepType, Visual, VisualCapture,
    REDACTED_SENTINEL,
};

/// Attribute values that mark a field as holding a secret
static SENSITIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)pass(word|code|phrase|wd)?\b").unwrap(),
        Regex::new(r"(?i)\bpin\b").unwrap(),
        Regex::new(r"(?i)\botp\b|one[\s_-]?time").unwrap(),
        Regex::new(r"(?i)secret").unwrap(),
        Regex::new(r"(?i)security[\s_-]?(code|answer|question)").unwrap(),
        Regex::new(r"(?i)\b(cvv|cvc|csc)\b").unwrap(),
    ]
});

const SENSITIVE_AUTOCOMPLETE: [&str; 3] = ["current-password", "new-password", "one-time-code"];

const MAX_TEXT_LEN: usize = 200;

/// Whether a value typed into this element must never be stored
pub fn is_sensitive(el: &PageElement) -> bool {
    if el
        .input_type
        .as_deref()
        .map_or(false, |t| t.eq_ignore_ascii_case("password"))
    {
        return true;
    }
    if let Some(ac) = el.autocomplete.as_deref() {
        if ac
            .split_whitespace()
            .any(|token| SENSITIVE_AUTOCOMPLETE.contains(&token.to_lowercase().as_str()))
        {
            return true;
        }
    }

    [
        el.name.as_deref(),
        el.label.as_deref(),
        el.aria_label.as_deref(),
        el.placeholder.as_deref(),
        el.title.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|attr| SENSITIVE_PATTERNS.iter().any(|p| p.is_match(attr)))
}

/// Human label used when prompting for a redacted value
pub fn field_label(el: &PageElement) -> String {
    [
        el.label.as_deref(),
        el.aria_label.as_deref(),
        el.placeholder.as_deref(),
        el.title.as_deref(),
        el.name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(normalize_text)
    .find(|s| !s.is_empty())
    .unwrap_or_else(|| {
        if el.autocomplete.as_deref() == Some("one-time-code") {
            "One-time code".to_string()
        } else {
            "Password".to_string()
        }
    })
}

fn clip(s: &str) -> Option<String> {
    let s = normalize_text(s);
    if s.is_empty() {
        None
    } else {
        Some(s.chars().take(MAX_TEXT_LEN).collect())
    }
}

fn identification(el: &PageElement) -> Identification {
    Identification {
        text: clip(el.visible_text()),
        aria_label: el.aria_label.as_deref().and_then(clip),
        placeholder: el.placeholder.as_deref().and_then(clip),
        title: el.title.as_deref().and_then(clip),
        role: el.role.clone().filter(|r| !r.trim().is_empty()),
    }
}

fn context(el: &PageElement) -> StepContext {
    StepContext {
        form_index: el.form_index,
        element_index: el.element_index,
        nearby_text: el.nearby_text.iter().filter_map(|t| clip(t)).collect(),
        parent_text: el.parent_text.as_deref().and_then(clip),
    }
}

/// Build a step from one interaction; visual capture is added separately
pub fn build_step(event: &InteractionEvent, timestamp: i64) -> Step {
    let el = &event.target;
    let step_type = match event.kind {
        InteractionKind::Click => StepType::Click,
        InteractionKind::Input => StepType::Input,
        InteractionKind::Select => StepType::Select,
    };

    let (value, field_label) = match step_type {
        StepType::Click => (None, None),
        _ if is_sensitive(el) => (Some(REDACTED_SENTINEL.to_string()), Some(field_label(el))),
        _ => (event.value.clone(), None),
    };

    let center = el.bounds.center();
    Step {
        step_type,
        timestamp,
        identification: identification(el),
        context: context(el),
        visual: Visual::NotRecorded,
        coordinates: Coordinates {
            x: event.pointer.x,
            y: event.pointer.y,
            element_x: center.x,
            element_y: center.y,
        },
        value,
        field_label,
    }
}

/// Local description used when no vision backend describes the crop
pub fn heuristic_description(el: &PageElement) -> String {
    let kind = match el.role.as_deref() {
        Some(role) if !role.is_empty() => role.to_string(),
        _ => el.tag.clone(),
    };
    let mut parts = vec![kind];
    if let Some(text) = identification(el).descriptors().next() {
        parts.push(format!("labelled \"{}\"", text));
    }
    if let Some(near) = el.nearby_text.first().and_then(|t| clip(t)) {
        parts.push(format!("near \"{}\"", near));
    }
    parts.push(format!(
        "at about ({:.0}, {:.0})",
        el.bounds.center().x,
        el.bounds.center().y
    ));
    parts.join(" ")
}

/// Crop the target from the page and describe it; any failure leaves the
/// step without a visual descriptor
pub async fn capture_visual(
    session: &dyn BrowserSession,
    vision: Option<&dyn VisionCapability>,
    el: &PageElement,
) -> Visual {
    if el.bounds.area() <= 0.0 {
        return Visual::NotRecorded;
    }

    let crop = match session.screenshot_region(el.bounds).await {
        Ok(crop) => crop,
        Err(e) => {
            log::debug!("Visual capture skipped for node {}: {:#}", el.node_id, e);
            return Visual::NotRecorded;
        }
    };

    let description = match vision {
        Some(vision) => match vision.describe(&crop).await {
            Ok(d) if !d.trim().is_empty() => d,
            Ok(_) => heuristic_description(el),
            Err(e) => {
                log::debug!("Vision describe failed, using heuristic: {}", e);
                heuristic_description(el)
            }
        },
        None => heuristic_description(el),
    };

    Visual::Recorded(VisualCapture {
        screenshot: STANDARD.encode(&crop),
        ai_description: description,
        bounding_box: BoundingBox {
            width: el.bounds.width,
            height: el.bounds.height,
        },
    })
}

/// Accumulates steps in arrival order
#[derive(Default)]
pub struct StepSequence {
    steps: Vec<Step>,
    last_node: Option<u32>,
}

impl StepSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp for the next step, forced strictly after the previous one
    pub fn next_timestamp(&self, observed: i64) -> i64 {
        match self.steps.last() {
            Some(last) if observed <= last.timestamp => last.timestamp + 1,
            _ => observed,
        }
    }

    /// Append a step. A value commit to the same field as the previous input
    /// step replaces that step's value instead of adding a new one.
    pub fn push(&mut self, node_id: u32, step: Step) {
        if let Some(last) = self.steps.last_mut() {
            let same_field = self.last_node == Some(node_id)
                && last.step_type == step.step_type
                && step.step_type != StepType::Click;
            if same_field {
                last.value = step.value;
                last.field_label = step.field_label;
                return;
            }
        }
        self.last_node = Some(node_id);
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}
