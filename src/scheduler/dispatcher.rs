//! Cron-driven run-all dispatcher
//!
//! One dispatcher task sleeps until the next fire time and then tries to take
//! the run lock. A tick that finds the lock held is skipped, never queued.
//! Every enabled recipe is replayed in sequence under a single lock guard.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::expr::CronSpec;
use super::state::{RunLogEntry, RunLogStatus, ScheduleState};
use crate::capability::ImportSink;
use crate::error::{ReplayError, ReplayResult};
use crate::runner::{PlayOptions, Player, RunGuard};
use crate::store::{RecipeStore, ScheduleStateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TickSkipped {
        holder: String,
    },
    RunStarted {
        trigger: Trigger,
        recipes: usize,
    },
    RecipeFinished {
        entry: RunLogEntry,
    },
    RunFinished {
        summary: RunAllSummary,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunAllSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

struct Dispatcher {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    player: Arc<Player>,
    recipes: Arc<dyn RecipeStore>,
    store: Arc<dyn ScheduleStateStore>,
    clock: Arc<dyn Clock>,
    import: Option<Arc<dyn ImportSink>>,
    state: Mutex<ScheduleState>,
    dispatcher: Mutex<Option<Dispatcher>>,
    current_run: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// Short critical sections only; a poisoned lock still holds usable data
fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        player: Arc<Player>,
        recipes: Arc<dyn RecipeStore>,
        store: Arc<dyn ScheduleStateStore>,
        clock: Arc<dyn Clock>,
        import: Option<Arc<dyn ImportSink>>,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                player,
                recipes,
                store,
                clock,
                import,
                state: Mutex::new(ScheduleState::default()),
                dispatcher: Mutex::new(None),
                current_run: Mutex::new(None),
                events,
            }),
        }
    }

    /// Load persisted state, clear a stale running flag and re-arm the
    /// dispatcher if the schedule was enabled
    pub async fn init(&self) -> ReplayResult<()> {
        let mut state = match self.inner.store.load().await? {
            Some(state) => state,
            None => {
                log::debug!("No persisted schedule, nothing to arm");
                return Ok(());
            }
        };
        if state.is_running || state.current_recording_name.is_some() {
            log::warn!(
                "Clearing stale running flag (was running {:?})",
                state.current_recording_name
            );
            state.is_running = false;
            state.current_recording_name = None;
            *locked(&self.inner.state) = state.clone();
            self.persist().await;
        } else {
            *locked(&self.inner.state) = state.clone();
        }

        if state.enabled {
            match state.cron_expr.as_deref().map(CronSpec::parse) {
                Some(Ok(spec)) => self.arm(spec),
                Some(Err(e)) => log::error!("Persisted schedule is invalid, not arming: {}", e),
                None => log::warn!("Schedule enabled without an expression, not arming"),
            }
        }
        Ok(())
    }

    /// Enable the schedule with a cron expression or interval name
    pub async fn start(&self, expr: &str) -> ReplayResult<ScheduleState> {
        let spec = CronSpec::parse(expr)?;
        let state = {
            let mut state = locked(&self.inner.state);
            state.cron_expr = Some(spec.expr.clone());
            state.interval = spec.interval.clone();
            state.enabled = true;
            state.clone()
        };
        self.persist().await;
        log::info!(
            "Schedule enabled: {}{}",
            spec.expr,
            spec.interval
                .as_deref()
                .map(|i| format!(" ({})", i))
                .unwrap_or_default()
        );
        self.arm(spec);
        Ok(state)
    }

    /// Disable the schedule; a run in progress finishes normally
    pub async fn stop(&self) -> ReplayResult<()> {
        self.disarm();
        locked(&self.inner.state).enabled = false;
        self.persist().await;
        log::info!("Schedule disabled");
        Ok(())
    }

    /// Stop the dispatcher and cancel any run in progress
    pub fn shutdown(&self) {
        self.disarm();
        self.cancel_current();
    }

    /// Cancel the run-all in progress; returns whether there was one
    pub fn cancel_current(&self) -> bool {
        match locked(&self.inner.current_run).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> ScheduleState {
        locked(&self.inner.state).clone()
    }

    pub fn is_armed(&self) -> bool {
        locked(&self.inner.dispatcher).is_some()
    }

    /// Next fire time of the enabled schedule
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        let state = self.status();
        if !state.enabled {
            return None;
        }
        let spec = CronSpec::parse(state.cron_expr.as_deref()?).ok()?;
        spec.next_after(&self.inner.clock.now())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Replay every enabled recipe now, waiting for the run lock if needed
    pub async fn run_all_now(&self) -> ReplayResult<RunAllSummary> {
        let guard = self.inner.player.lock().acquire("run-all (manual)").await;
        self.run_all(guard, Trigger::Manual).await
    }

    fn arm(&self, spec: CronSpec) {
        self.disarm();
        let stop = CancellationToken::new();
        let from = self.inner.clock.now();
        let handle = tokio::spawn(self.clone().dispatch(spec, from, stop.clone()));
        *locked(&self.inner.dispatcher) = Some(Dispatcher { stop, handle });
    }

    fn disarm(&self) {
        if let Some(dispatcher) = locked(&self.inner.dispatcher).take() {
            dispatcher.stop.cancel();
            // The loop may be parked inside a clock that ignores cancellation
            dispatcher.handle.abort();
        }
    }

    async fn dispatch(self, spec: CronSpec, from: DateTime<Utc>, stop: CancellationToken) {
        let mut cursor = from;
        loop {
            let next = match spec.next_after(&cursor) {
                Some(next) => next,
                None => {
                    log::info!("Schedule {} has no upcoming fire time", spec.expr);
                    break;
                }
            };
            log::debug!("Next scheduled run at {}", next);

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.inner.clock.sleep_until(next) => {}
            }

            self.on_tick().await;
            // After a long sleep, fire once and resume from now
            cursor = next.max(self.inner.clock.now());
        }
    }

    async fn on_tick(&self) {
        match self.inner.player.lock().try_acquire("run-all (scheduled)") {
            Ok(guard) => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.run_all(guard, Trigger::Scheduled).await {
                        log::error!("Scheduled run failed: {}", e);
                    }
                });
            }
            Err(ReplayError::ScheduleOverlap { holder }) => {
                log::warn!("Skipping scheduled run: {} is in progress", holder);
                let _ = self.inner.events.send(SchedulerEvent::TickSkipped { holder });
            }
            Err(e) => log::error!("Scheduled tick failed: {}", e),
        }
    }

    async fn run_all(&self, guard: RunGuard, trigger: Trigger) -> ReplayResult<RunAllSummary> {
        let recipes: Vec<_> = self
            .inner
            .recipes
            .list()
            .await?
            .into_iter()
            .filter(|r| r.schedule_enabled)
            .collect();

        let cancel = CancellationToken::new();
        *locked(&self.inner.current_run) = Some(cancel.clone());
        locked(&self.inner.state).is_running = true;
        self.persist().await;

        log::info!("Run-all started ({:?}): {} recipes", trigger, recipes.len());
        let _ = self.inner.events.send(SchedulerEvent::RunStarted {
            trigger,
            recipes: recipes.len(),
        });

        let options = PlayOptions {
            capture: self.inner.import.is_some(),
        };
        let mut summary = RunAllSummary::default();

        for recipe in &recipes {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            locked(&self.inner.state).current_recording_name = Some(recipe.name.clone());
            self.persist().await;

            let result = self
                .inner
                .player
                .execute_locked(recipe, &guard, cancel.child_token(), options)
                .await;
            let finished_at = self.inner.clock.now();

            let entry = match result {
                Ok(report) => {
                    if let (Some(sink), Some(data)) = (&self.inner.import, &report.extracted) {
                        if let Err(e) = sink.import(&recipe.id, data).await {
                            log::warn!("Import of {} failed: {:#}", recipe.name, e);
                        }
                    }
                    RunLogEntry::from_report(&report, finished_at)
                }
                Err(e) => RunLogEntry {
                    recipe_id: recipe.id.clone(),
                    recipe_name: recipe.name.clone(),
                    status: RunLogStatus::Failed,
                    failed_step: None,
                    reason: Some(e.to_string()),
                    finished_at,
                },
            };

            match entry.status {
                RunLogStatus::Succeeded => summary.succeeded += 1,
                RunLogStatus::Failed => summary.failed += 1,
                RunLogStatus::Cancelled => summary.cancelled = true,
            }

            {
                let mut state = locked(&self.inner.state);
                state.last_run_at = Some(finished_at);
                state.push_log(entry.clone());
            }
            self.persist().await;
            let _ = self.inner.events.send(SchedulerEvent::RecipeFinished { entry });

            if summary.cancelled {
                break;
            }
        }

        {
            let mut state = locked(&self.inner.state);
            state.is_running = false;
            state.current_recording_name = None;
        }
        self.persist().await;
        locked(&self.inner.current_run).take();
        drop(guard);

        log::info!(
            "Run-all finished: {} succeeded, {} failed{}",
            summary.succeeded,
            summary.failed,
            if summary.cancelled { ", cancelled" } else { "" }
        );
        let _ = self.inner.events.send(SchedulerEvent::RunFinished {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    async fn persist(&self) {
        let state = self.status();
        if let Err(e) = self.inner.store.save(&state).await {
            log::warn!("Failed to persist schedule state: {:#}", e);
        }
    }
}
