//! Player: executes a recipe step by step
//!
//! Per step the player prompts for a redacted value (once), then loops
//! snapshot → resolve → act. Transient failures are retried with exponential
//! backoff; a lost session gets its own, smaller retry budget and is
//! relaunched when the browser is gone. Cancellation is observed between
//! steps, before each action, during backoff sleeps and while prompting,
//! never in the middle of an action.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::events::{EventEmitter, PlayerEvent};
use super::lock::{RunGuard, RunLock};
use super::state::{PlayerState, RunReport, RunState, RunStatus};
use crate::capability::{CredentialPrompt, ExtractedTable, ExtractedTables, Secret};
use crate::driver::traits::is_session_lost;
use crate::driver::web::scripts::EXTRACT_TABLES_SCRIPT;
use crate::driver::{BrowserSession, HostError, PageElement, SessionLauncher};
use crate::error::{ReplayError, ReplayResult};
use crate::recipe::{Recipe, Step, StepType};
use crate::resolver::{Resolver, Strategy};
use crate::utils::config::Config;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Retries per step after the first attempt
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// Retries per step after the host session was lost
    pub session_lost_retries: u32,
    pub prompt_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            session_lost_retries: 1,
            prompt_timeout: Duration::from_millis(120_000),
        }
    }
}

impl PlayerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            session_lost_retries: config.session_lost_retries,
            prompt_timeout: Duration::from_millis(config.prompt_timeout_ms),
        }
    }

    /// Delay before the given retry (1-based): base × 2^(retry-1)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    /// Extract tables from the final page after a successful run
    pub capture: bool,
}

/// Why a single attempt at a step failed
#[derive(Debug)]
enum AttemptError {
    Resolution(String),
    SessionLost { message: String, closed: bool },
    Host(String),
    Cancelled,
}

impl AttemptError {
    fn from_host(err: anyhow::Error) -> Self {
        if is_session_lost(&err) {
            let closed = err
                .chain()
                .any(|c| matches!(c.downcast_ref::<HostError>(), Some(HostError::SessionClosed)));
            AttemptError::SessionLost {
                message: format!("{:#}", err),
                closed,
            }
        } else {
            AttemptError::Host(format!("{:#}", err))
        }
    }

    fn reason(&self, index: usize) -> String {
        match self {
            AttemptError::Resolution(trace) => {
                format!("{} ({})", ReplayError::ResolutionFailure { index }, trace)
            }
            AttemptError::SessionLost { message, .. } => {
                ReplayError::SessionLost(message.clone()).to_string()
            }
            AttemptError::Host(message) => message.clone(),
            AttemptError::Cancelled => ReplayError::Cancelled.to_string(),
        }
    }
}

enum StepEnd {
    Passed,
    Failed(String),
    Cancelled,
}

/// Live session plus the last page it was on, for relaunching
struct Browser {
    session: Box<dyn BrowserSession>,
    last_url: String,
}

pub struct Player {
    launcher: Arc<dyn SessionLauncher>,
    resolver: Resolver,
    prompt: Arc<dyn CredentialPrompt>,
    lock: RunLock,
    config: PlayerConfig,
    events: EventEmitter,
    state: watch::Sender<PlayerState>,
}

impl Player {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        resolver: Resolver,
        prompt: Arc<dyn CredentialPrompt>,
        lock: RunLock,
        config: PlayerConfig,
    ) -> Self {
        let (state, _) = watch::channel(PlayerState::Idle);
        Self {
            launcher,
            resolver,
            prompt,
            lock,
            config,
            events: EventEmitter::default(),
            state,
        }
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlayerState> {
        self.state.subscribe()
    }

    /// Run a recipe on demand; fails fast if another session holds the run lock
    pub async fn execute(&self, recipe: &Recipe, cancel: CancellationToken) -> ReplayResult<RunReport> {
        let guard = self.lock.try_acquire(&format!("playback: {}", recipe.name))?;
        self.execute_locked(recipe, &guard, cancel, PlayOptions::default())
            .await
    }

    /// Run a recipe while the caller holds the run lock
    pub async fn execute_locked(
        &self,
        recipe: &Recipe,
        _guard: &RunGuard,
        cancel: CancellationToken,
        options: PlayOptions,
    ) -> ReplayResult<RunReport> {
        recipe.validate()?;

        let mut run = RunState::new(recipe);
        self.set_state(PlayerState::Running { step: 0 });
        self.events.emit(PlayerEvent::RunStarted {
            recipe_id: recipe.id.clone(),
            recipe_name: recipe.name.clone(),
            step_count: recipe.steps.len(),
        });
        log::info!("Replaying {} ({} steps)", recipe.display_name(), recipe.steps.len());

        let mut browser = match self.open(&recipe.url).await {
            Ok(browser) => browser,
            Err(e) => {
                let reason = format!("{:#}", e);
                run.skip_remaining("browser did not start");
                self.set_state(PlayerState::Failed {
                    step: 0,
                    reason: reason.clone(),
                });
                let report = run.finish(RunStatus::Failed { step_index: 0, reason }, None);
                self.events.emit(PlayerEvent::RunFinished {
                    report: report.clone(),
                });
                return Ok(report);
            }
        };

        let status = self.run_steps(recipe, &mut run, &mut browser, &cancel).await;

        let extracted = if status == RunStatus::Succeeded && options.capture {
            match extract_tables(&browser).await {
                Ok(data) => Some(data),
                Err(e) => {
                    log::warn!("Structured capture failed: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = browser.session.close().await {
            log::warn!("Failed to close browser session: {:#}", e);
        }

        self.set_state(match &status {
            RunStatus::Succeeded => PlayerState::Succeeded,
            RunStatus::Failed { step_index, reason } => PlayerState::Failed {
                step: *step_index,
                reason: reason.clone(),
            },
            RunStatus::Cancelled => PlayerState::Cancelled,
        });

        let report = run.finish(status, extracted);
        log::info!(
            "Run of {} finished: {:?} ({}/{} steps)",
            recipe.name,
            report.status,
            report.passed(),
            report.steps.len()
        );
        self.events.emit(PlayerEvent::RunFinished {
            report: report.clone(),
        });
        Ok(report)
    }

    async fn open(&self, url: &str) -> anyhow::Result<Browser> {
        let session = self.launcher.launch().await?;
        if let Err(e) = session.navigate(url).await {
            session.close().await.ok();
            return Err(e);
        }
        Ok(Browser {
            session,
            last_url: url.to_string(),
        })
    }

    async fn run_steps(
        &self,
        recipe: &Recipe,
        run: &mut RunState,
        browser: &mut Browser,
        cancel: &CancellationToken,
    ) -> RunStatus {
        for (index, step) in recipe.steps.iter().enumerate() {
            run.current_index = index;

            if cancel.is_cancelled() {
                run.skip_remaining("run cancelled");
                self.emit_skipped(run);
                return RunStatus::Cancelled;
            }

            self.set_state(PlayerState::Running { step: index });
            self.events.emit(PlayerEvent::StepStarted {
                index,
                description: step.describe(),
            });
            if let Some(state) = run.current_step() {
                state.start();
            }

            let end = self.run_step(index, step, run, browser, cancel).await;
            let duration_ms = run.steps[index].duration_ms.unwrap_or(0);

            match end {
                StepEnd::Passed => {}
                StepEnd::Failed(reason) => {
                    log::warn!("Step {} failed: {}", index, reason);
                    self.events.emit(PlayerEvent::StepFailed {
                        index,
                        error: reason.clone(),
                        duration_ms,
                    });
                    run.current_index = index + 1;
                    run.skip_remaining("previous step failed");
                    self.emit_skipped(run);
                    return RunStatus::Failed {
                        step_index: index,
                        reason,
                    };
                }
                StepEnd::Cancelled => {
                    run.steps[index].skip("run cancelled");
                    run.skip_remaining("run cancelled");
                    self.emit_skipped(run);
                    return RunStatus::Cancelled;
                }
            }
        }

        RunStatus::Succeeded
    }

    async fn run_step(
        &self,
        index: usize,
        step: &Step,
        run: &mut RunState,
        browser: &mut Browser,
        cancel: &CancellationToken,
    ) -> StepEnd {
        let secret = if step.is_redacted() {
            match self.request_secret(index, step, cancel).await {
                Ok(secret) => Some(secret),
                Err(ReplayError::Cancelled) => return StepEnd::Cancelled,
                Err(e) => {
                    let reason = e.to_string();
                    run.steps[index].fail(reason.clone());
                    return StepEnd::Failed(reason);
                }
            }
        } else {
            None
        };

        let value = match &secret {
            Some(secret) => Some(secret.expose()),
            None => step.value.as_deref(),
        };

        let mut retries = 0u32;
        let mut lost = 0u32;

        loop {
            run.steps[index].attempt();

            let err = match self.attempt(step, value, browser, cancel).await {
                Ok(strategy) => {
                    let state = &mut run.steps[index];
                    state.pass(strategy);
                    self.events.emit(PlayerEvent::StepPassed {
                        index,
                        strategy,
                        duration_ms: state.duration_ms.unwrap_or(0),
                    });
                    return StepEnd::Passed;
                }
                Err(AttemptError::Cancelled) => return StepEnd::Cancelled,
                Err(err) => err,
            };

            let reason = scrub(&err.reason(index), secret.as_ref());
            let (counter, max) = match err {
                AttemptError::SessionLost { .. } => (&mut lost, self.config.session_lost_retries),
                _ => (&mut retries, self.config.retry_attempts),
            };

            if *counter >= max {
                run.steps[index].fail(reason.clone());
                return StepEnd::Failed(reason);
            }

            *counter += 1;
            let attempt = *counter;
            let delay = self.config.backoff(attempt);
            log::info!(
                "Retrying step {} ({}/{}) in {}ms: {}",
                index,
                attempt,
                max,
                delay.as_millis(),
                reason
            );
            run.steps[index].retry(attempt, max);
            self.set_state(PlayerState::Retrying {
                step: index,
                attempt,
                max_attempts: max,
            });
            self.events.emit(PlayerEvent::StepRetrying {
                index,
                attempt,
                max_attempts: max,
                delay_ms: delay.as_millis() as u64,
                reason,
            });

            tokio::select! {
                _ = cancel.cancelled() => return StepEnd::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            if let AttemptError::SessionLost { closed: true, .. } = err {
                if let Err(e) = self.relaunch(browser).await {
                    log::warn!("Relaunching browser failed: {:#}", e);
                }
            }

            self.set_state(PlayerState::Running { step: index });
        }
    }

    /// One snapshot → resolve → act pass
    async fn attempt(
        &self,
        step: &Step,
        value: Option<&str>,
        browser: &mut Browser,
        cancel: &CancellationToken,
    ) -> Result<Strategy, AttemptError> {
        let session = browser.session.as_ref();

        let page = session.snapshot().await.map_err(AttemptError::from_host)?;
        if !page.url.is_empty() {
            browser.last_url = page.url.clone();
        }

        let outcome = self
            .resolver
            .resolve(step, &page, session)
            .await
            .map_err(AttemptError::from_host)?;

        let resolution = match outcome.resolution {
            Some(resolution) => resolution,
            None => return Err(AttemptError::Resolution(outcome.summary())),
        };

        // Last point at which cancelling leaves nothing half-applied
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        act(session, step, &resolution.element, value)
            .await
            .map_err(AttemptError::from_host)?;

        log::debug!(
            "Step {} resolved via {} to <{}> node {}",
            step.describe(),
            resolution.strategy,
            resolution.element.tag,
            resolution.element.node_id
        );
        Ok(resolution.strategy)
    }

    async fn request_secret(
        &self,
        index: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> ReplayResult<Secret> {
        let field_label = step.prompt_label();
        self.set_state(PlayerState::Prompting {
            step: index,
            field_label: field_label.clone(),
        });
        self.events.emit(PlayerEvent::Prompting {
            index,
            field_label: field_label.clone(),
        });
        log::info!("Step {} waiting for '{}'", index, field_label);

        let request = tokio::time::timeout(self.config.prompt_timeout, self.prompt.request(&field_label));

        let answer = tokio::select! {
            _ = cancel.cancelled() => return Err(ReplayError::Cancelled),
            answer = request => answer,
        };

        let result = match answer {
            Err(_) => Err(ReplayError::RedactedValueTimeout {
                field_label,
                timeout_ms: self.config.prompt_timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(ReplayError::Host(e)),
            Ok(Ok(None)) => Err(ReplayError::PromptCancelled(field_label)),
            Ok(Ok(Some(secret))) => Ok(secret),
        };

        self.set_state(PlayerState::Running { step: index });
        result
    }

    async fn relaunch(&self, browser: &mut Browser) -> anyhow::Result<()> {
        log::info!("Relaunching browser at {}", browser.last_url);
        browser.session.close().await.ok();
        let fresh = self.open(&browser.last_url).await?;
        *browser = fresh;
        Ok(())
    }

    fn emit_skipped(&self, run: &RunState) {
        for step in &run.steps[run.current_index..] {
            if let super::state::StepStatus::Skipped { reason } = &step.status {
                self.events.emit(PlayerEvent::StepSkipped {
                    index: step.index,
                    reason: reason.clone(),
                });
            }
        }
    }

    fn set_state(&self, state: PlayerState) {
        self.state.send_replace(state);
    }
}

async fn act(
    session: &dyn BrowserSession,
    step: &Step,
    element: &PageElement,
    value: Option<&str>,
) -> anyhow::Result<()> {
    match step.step_type {
        StepType::Click => session.click_at(element.bounds.center()).await,
        StepType::Input => session.set_value(element.node_id, value.unwrap_or("")).await,
        StepType::Select => {
            let value = value.ok_or_else(|| anyhow::anyhow!("select step has no value"))?;
            session.select_option(element.node_id, value).await
        }
    }
}

async fn extract_tables(browser: &Browser) -> anyhow::Result<ExtractedTables> {
    let raw = browser.session.evaluate(EXTRACT_TABLES_SCRIPT).await?;
    let tables: Vec<ExtractedTable> = serde_json::from_value(raw)?;
    Ok(ExtractedTables {
        source_url: browser.last_url.clone(),
        tables,
    })
}

/// Mask a supplied secret should a host echo it back in an error
fn scrub(message: &str, secret: Option<&Secret>) -> String {
    match secret {
        Some(secret) if !secret.expose().is_empty() => message.replace(secret.expose(), "******"),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::VisionError;
    use crate::recipe::{BoundingBox, Visual, VisualCapture, REDACTED_SENTINEL};
    use crate::resolver::ResolverConfig;
    use crate::runner::state::StepStatus;
    use crate::testing::{
        element, recipe, step, Action, FakeLauncher, FakePrompt, FakeSession, FakeVision,
        PendingPrompt,
    };
    use tokio::sync::broadcast;

    fn player(session: &FakeSession, prompt: Arc<dyn CredentialPrompt>) -> Player {
        Player::new(
            Arc::new(FakeLauncher::new(session.clone())),
            Resolver::new(ResolverConfig::default(), None),
            prompt,
            RunLock::new(),
            PlayerConfig::default(),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn password_field() -> PageElement {
        let mut input = element(2, "input", "");
        input.input_type = Some("password".into());
        input.placeholder = Some("Password".into());
        input.bounds = crate::driver::Bounds::new(100.0, 200.0, 200.0, 30.0);
        input
    }

    fn login_recipe() -> Recipe {
        let mut pw = step(StepType::Input, 2, "");
        pw.identification.text = None;
        pw.identification.placeholder = Some("Password".into());
        pw.value = Some(REDACTED_SENTINEL.into());
        pw.field_label = Some("Online banking password".into());
        pw.coordinates.element_x = 200.0;
        pw.coordinates.element_y = 215.0;
        recipe(vec![step(StepType::Click, 1, "Login"), pw])
    }

    #[tokio::test]
    async fn test_login_with_prompted_password_succeeds_without_leaking() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login"), password_field()]);
        let prompt = Arc::new(FakePrompt::answering("s3cr3t-pa55"));
        let player = player(&session, prompt.clone());
        let mut rx = player.events().subscribe();
        let mut states = player.subscribe_state();

        let report = player
            .execute(&login_recipe(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.steps.len(), 2);
        for outcome in &report.steps {
            assert_eq!(
                outcome.status,
                StepStatus::Passed {
                    strategy: Strategy::TextRole
                }
            );
        }
        assert_eq!(prompt.calls(), 1);
        assert_eq!(*states.borrow_and_update(), PlayerState::Succeeded);

        // The secret reached the page and nothing else
        assert!(session.actions().contains(&Action::SetValue {
            node: 2,
            value: "s3cr3t-pa55".into()
        }));
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("s3cr3t-pa55"));
        assert!(!json.contains(REDACTED_SENTINEL));

        let events = drain(&mut rx);
        let prompts = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::Prompting { .. }))
            .count();
        assert_eq!(prompts, 1);
        assert!(!format!("{:?}", events).contains("s3cr3t-pa55"));
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_is_exponential_then_fails() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login")]);
        let player = player(&session, Arc::new(FakePrompt::answering("x")));
        let mut rx = player.events().subscribe();

        let mut missing = step(StepType::Click, 1, "Sign on");
        missing.coordinates.element_x = 900.0;
        missing.coordinates.element_y = 600.0;
        let r = recipe(vec![missing, step(StepType::Click, 2, "Login")]);

        let started = tokio::time::Instant::now();
        let report = player.execute(&r, CancellationToken::new()).await.unwrap();

        let delays: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PlayerEvent::StepRetrying { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000]);
        assert!(started.elapsed() >= Duration::from_millis(14_000));

        match &report.status {
            RunStatus::Failed { step_index, reason } => {
                assert_eq!(*step_index, 0);
                assert!(reason.contains("no strategy matched step 0"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(report.steps[0].attempts, 4);
        assert!(matches!(report.steps[1].status, StepStatus::Skipped { .. }));
        assert!(session.actions().is_empty());
        assert!(matches!(player.state(), PlayerState::Failed { step: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_vision_error_retries_instead_of_clicking_coordinates() {
        let session = FakeSession::with_elements(vec![element(4, "div", "Ad banner")]);
        let vision = Arc::new(FakeVision::failing(VisionError::Transient("timeout".into())));
        let player = Player::new(
            Arc::new(FakeLauncher::new(session.clone())),
            Resolver::new(ResolverConfig::default(), Some(vision.clone())),
            Arc::new(FakePrompt::answering("x")),
            RunLock::new(),
            PlayerConfig {
                retry_attempts: 1,
                ..Default::default()
            },
        );
        let mut rx = player.events().subscribe();

        let mut export = step(StepType::Click, 1, "Export");
        export.visual = Visual::Recorded(VisualCapture {
            screenshot: String::new(),
            ai_description: "green Export button".into(),
            bounding_box: BoundingBox {
                width: 80.0,
                height: 30.0,
            },
        });
        let report = player
            .execute(&recipe(vec![export]), CancellationToken::new())
            .await
            .unwrap();

        let retries: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PlayerEvent::StepRetrying { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(retries.len(), 1);
        assert!(retries[0].contains("vision request failed"));

        assert!(matches!(report.status, RunStatus::Failed { step_index: 0, .. }));
        assert_eq!(report.steps[0].attempts, 2);
        assert_eq!(vision.locate_calls(), 2);
        assert!(session.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_lost_is_retried_once() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login")]);
        let launcher = Arc::new(FakeLauncher::new(session.clone()));
        let player = Player::new(
            launcher.clone(),
            Resolver::new(ResolverConfig::default(), None),
            Arc::new(FakePrompt::answering("x")),
            RunLock::new(),
            PlayerConfig::default(),
        );
        let r = recipe(vec![step(StepType::Click, 1, "Login")]);

        session.fail_next_actions(1);
        let report = player.execute(&r, CancellationToken::new()).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.steps[0].attempts, 2);
        assert_eq!(launcher.launches(), 2);

        session.fail_next_actions(2);
        let report = player.execute(&r, CancellationToken::new()).await.unwrap();
        match report.status {
            RunStatus::Failed { reason, .. } => assert!(reason.contains("browser session lost")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_prompt_times_out() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login"), password_field()]);
        let player = player(&session, Arc::new(PendingPrompt));

        let report = player
            .execute(&login_recipe(), CancellationToken::new())
            .await
            .unwrap();
        match &report.status {
            RunStatus::Failed { step_index, reason } => {
                assert_eq!(*step_index, 1);
                assert!(reason.contains("Online banking password"));
                assert!(reason.contains("120000ms"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_declined_prompt_fails_run() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login"), password_field()]);
        let player = player(&session, Arc::new(FakePrompt::declining()));

        let report = player
            .execute(&login_recipe(), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(report.status, RunStatus::Failed { step_index: 1, .. }));
        assert_eq!(session.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_prompting_releases_session() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login"), password_field()]);
        let player = Arc::new(player(&session, Arc::new(PendingPrompt)));
        let cancel = CancellationToken::new();
        let mut states = player.subscribe_state();

        let handle = {
            let player = player.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { player.execute(&login_recipe(), cancel).await })
        };

        states
            .wait_for(|s| matches!(s, PlayerState::Prompting { .. }))
            .await
            .unwrap();
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(matches!(report.steps[0].status, StepStatus::Passed { .. }));
        assert!(matches!(report.steps[1].status, StepStatus::Skipped { .. }));
        assert!(session.is_closed());
        assert!(!player.lock().is_locked());
        assert_eq!(player.state(), PlayerState::Cancelled);
    }

    #[tokio::test]
    async fn test_execute_refuses_when_lock_is_held() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login")]);
        let player = player(&session, Arc::new(FakePrompt::answering("x")));
        let _recording = player.lock().try_acquire("recording: https://bank.example").unwrap();

        let r = recipe(vec![step(StepType::Click, 1, "Login")]);
        let err = player.execute(&r, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReplayError::ScheduleOverlap { .. }));
        assert!(session.actions().is_empty());
    }

    #[tokio::test]
    async fn test_structured_capture_extracts_tables() {
        let session = FakeSession::with_elements(vec![element(1, "button", "Login")]);
        session.set_evaluate_result(serde_json::json!([
            {"headers": ["Date", "Amount"], "rows": [["2024-03-01", "-4.20"], ["2024-03-02", "100.00"]]}
        ]));
        let player = player(&session, Arc::new(FakePrompt::answering("x")));
        let r = recipe(vec![step(StepType::Click, 1, "Login")]);

        let guard = player.lock().try_acquire("test").unwrap();
        let report = player
            .execute_locked(&r, &guard, CancellationToken::new(), PlayOptions { capture: true })
            .await
            .unwrap();
        let data = report.extracted.unwrap();
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.tables[0].headers, vec!["Date", "Amount"]);
    }

    #[test]
    fn test_backoff_formula() {
        let config = PlayerConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(2000));
        assert_eq!(config.backoff(2), Duration::from_millis(4000));
        assert_eq!(config.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_scrub_masks_secret() {
        let secret = Secret::new("hunter2");
        assert_eq!(
            scrub("option 'hunter2' missing", Some(&secret)),
            "option '******' missing"
        );
        assert_eq!(scrub("plain", None), "plain");
    }
}
