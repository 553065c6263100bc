//! Element Resolver
//!
//! Finds the live element a recorded step refers to. Strategies run in a
//! fixed priority order and the first match wins:
//!
//! 1. **Text/role**: recorded text, aria-label, placeholder or title
//! 2. **Structural**: form and element position, confirmed by surrounding text
//! 3. **Visual**: vision capability locates the recorded description on a screenshot
//! 4. **Coordinate**: element at the recorded element center
//!
//! The outcome carries a trace of every strategy tried, for diagnostics.

mod similarity;
pub mod strategies;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::capability::{VisionCapability, VisionError};
use crate::driver::{BrowserSession, PageElement, PageSnapshot};
use crate::error::ReplayError;
use crate::recipe::Step;

pub use similarity::{context_score, dice};

/// Default minimum context similarity for a structural match
pub const DEFAULT_STRUCTURAL_THRESHOLD: f64 = 0.6;

/// One element-identification strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    TextRole,
    Structural,
    Visual,
    Coordinate,
}

impl Strategy {
    /// Fixed priority order
    pub const ALL: [Strategy; 4] = [
        Strategy::TextRole,
        Strategy::Structural,
        Strategy::Visual,
        Strategy::Coordinate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::TextRole => "text/role",
            Strategy::Structural => "structural",
            Strategy::Visual => "visual",
            Strategy::Coordinate => "coordinate",
        }
    }

    fn rank(&self) -> usize {
        Strategy::ALL.iter().position(|s| s == self).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Enabled strategies; always tried in the fixed priority order
    pub strategies: Vec<Strategy>,
    pub structural_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategies: Strategy::ALL.to_vec(),
            structural_threshold: DEFAULT_STRUCTURAL_THRESHOLD,
        }
    }
}

/// A matched element and the strategy that found it
#[derive(Debug, Clone)]
pub struct Resolution {
    pub element: PageElement,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Matched,
    NoMatch,
    /// The strategy could not run for this step (missing data or capability)
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
}

/// Result of one resolve call
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub resolution: Option<Resolution>,
    pub attempts: Vec<StrategyAttempt>,
}

impl ResolveOutcome {
    /// One-line summary of the strategies tried, for failure reasons
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| match &a.outcome {
                AttemptOutcome::Matched => format!("{}: matched", a.strategy),
                AttemptOutcome::NoMatch => format!("{}: no match", a.strategy),
                AttemptOutcome::Skipped(why) => format!("{}: skipped ({})", a.strategy, why),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn tried(&self, strategy: Strategy) -> bool {
        self.attempts
            .iter()
            .any(|a| a.strategy == strategy && !matches!(a.outcome, AttemptOutcome::Skipped(_)))
    }
}

pub struct Resolver {
    config: ResolverConfig,
    vision: Option<Arc<dyn VisionCapability>>,
}

impl Resolver {
    pub fn new(config: ResolverConfig, vision: Option<Arc<dyn VisionCapability>>) -> Self {
        let mut config = config;
        config.strategies.sort_by_key(Strategy::rank);
        config.strategies.dedup();
        Self { config, vision }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Try each enabled strategy in order and stop at the first match.
    ///
    /// Host errors and a transient vision failure are returned as errors
    /// so the caller can retry the step. Every other strategy failure is
    /// recorded in the trace and the next strategy runs.
    pub async fn resolve(
        &self,
        step: &Step,
        page: &PageSnapshot,
        session: &dyn BrowserSession,
    ) -> anyhow::Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();

        for &strategy in &self.config.strategies {
            let (found, attempt) = match strategy {
                Strategy::TextRole => match strategies::text_role(step, page) {
                    Some(el) => (Some(el), AttemptOutcome::Matched),
                    None if step.identification.is_empty() => {
                        (None, AttemptOutcome::Skipped("no text descriptors".into()))
                    }
                    None => (None, AttemptOutcome::NoMatch),
                },
                Strategy::Structural => self.structural(step, page),
                Strategy::Visual => self.visual(step, page, session).await?,
                Strategy::Coordinate => match strategies::coordinate(step, page) {
                    Some(el) => (Some(el), AttemptOutcome::Matched),
                    None => (None, AttemptOutcome::NoMatch),
                },
            };

            log::debug!("Strategy {} for {}: {:?}", strategy, step.describe(), attempt);
            outcome.attempts.push(StrategyAttempt {
                strategy,
                outcome: attempt,
            });

            if let Some(element) = found {
                outcome.resolution = Some(Resolution { element, strategy });
                break;
            }
        }

        Ok(outcome)
    }

    fn structural(&self, step: &Step, page: &PageSnapshot) -> (Option<PageElement>, AttemptOutcome) {
        if step.context.element_index.is_none() {
            return (None, AttemptOutcome::Skipped("no structural context".into()));
        }
        match strategies::structural(step, page) {
            Some((el, score)) if score >= self.config.structural_threshold => {
                (Some(el), AttemptOutcome::Matched)
            }
            Some((_, score)) => {
                log::debug!(
                    "Structural candidate rejected: similarity {:.2} < {:.2}",
                    score,
                    self.config.structural_threshold
                );
                (None, AttemptOutcome::NoMatch)
            }
            None => (None, AttemptOutcome::NoMatch),
        }
    }

    async fn visual(
        &self,
        step: &Step,
        page: &PageSnapshot,
        session: &dyn BrowserSession,
    ) -> anyhow::Result<(Option<PageElement>, AttemptOutcome)> {
        let capture = match step.visual.capture() {
            Some(capture) => capture,
            None => return Ok((None, AttemptOutcome::Skipped("not recorded".into()))),
        };
        let vision = match &self.vision {
            Some(vision) => vision,
            None => {
                return Ok((None, AttemptOutcome::Skipped("no vision capability".into())));
            }
        };

        let screenshot = session.screenshot().await?;

        match vision.locate(&screenshot, &capture.ai_description).await {
            Ok(Some(point)) => match strategies::at_vision_point(page, point) {
                Some(el) => Ok((Some(el), AttemptOutcome::Matched)),
                None => Ok((None, AttemptOutcome::NoMatch)),
            },
            Ok(None) => Ok((None, AttemptOutcome::NoMatch)),
            Err(VisionError::Unavailable(why)) => {
                let skipped = ReplayError::VisionCapabilityUnavailable(why);
                log::info!("Skipping visual strategy: {}", skipped);
                Ok((None, AttemptOutcome::Skipped(skipped.to_string())))
            }
            // Falling through to coordinates here would act on a guess
            Err(e @ VisionError::Transient(_)) => {
                log::warn!("Vision lookup failed: {}", e);
                Err(e.into())
            }
        }
    }
}
