//! Boundary operations the host application calls
//!
//! `ReplayService` wires the recorder, player and scheduler to one run lock,
//! one recipe store and the external capabilities.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::capability::{
    ConsolePrompt, CredentialPrompt, HttpVision, ImportSink, JsonDropSink, VisionCapability,
};
use crate::driver::web::{WebLauncher, WebSessionConfig};
use crate::driver::SessionLauncher;
use crate::error::{ReplayError, ReplayResult};
use crate::recipe::{Recipe, StepEdit};
use crate::recorder::{EventRecorder, RecorderConfig, RecordingHandle, RecordingStatus};
use crate::resolver::Resolver;
use crate::runner::{PlayOptions, Player, PlayerConfig, RunLock, RunReport};
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::store::{JsonRecipeStore, JsonScheduleStateStore, RecipeStore, ScheduleStateStore};
use crate::utils::config::Config;

/// External collaborators of the service
pub struct ServiceDeps {
    pub launcher: Arc<dyn SessionLauncher>,
    pub vision: Option<Arc<dyn VisionCapability>>,
    pub prompt: Arc<dyn CredentialPrompt>,
    pub recipes: Arc<dyn RecipeStore>,
    pub schedule: Arc<dyn ScheduleStateStore>,
    pub import: Option<Arc<dyn ImportSink>>,
    pub clock: Arc<dyn Clock>,
}

/// A user edit to a stored recipe
#[derive(Debug, Clone)]
pub enum RecipeEdit {
    MoveStep { from: usize, to: usize },
    DeleteStep { index: usize },
    Step { index: usize, edit: StepEdit },
    Rename { name: String },
    ScheduleEnabled(bool),
}

pub struct ReplayService {
    recipes: Arc<dyn RecipeStore>,
    recorder: EventRecorder,
    player: Arc<Player>,
    scheduler: Scheduler,
    import: Option<Arc<dyn ImportSink>>,
    active_run: Mutex<Option<CancellationToken>>,
}

impl ReplayService {
    pub fn new(config: &Config, deps: ServiceDeps) -> Self {
        let lock = RunLock::new();
        let recorder = EventRecorder::new(
            deps.launcher.clone(),
            deps.vision.clone(),
            lock.clone(),
            RecorderConfig::from_config(config),
        );
        let player = Arc::new(Player::new(
            deps.launcher,
            Resolver::new(config.resolver(), deps.vision),
            deps.prompt,
            lock,
            PlayerConfig::from_config(config),
        ));
        let scheduler = Scheduler::new(
            player.clone(),
            deps.recipes.clone(),
            deps.schedule,
            deps.clock,
            deps.import.clone(),
        );

        Self {
            recipes: deps.recipes,
            recorder,
            player,
            scheduler,
            import: deps.import,
            active_run: Mutex::new(None),
        }
    }

    /// Production wiring: Playwright host, JSON stores, console prompt
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let launcher = WebLauncher::new(WebSessionConfig {
            headless: config.headless,
            viewport: config.viewport,
            executable: config.browser_executable.clone(),
        });
        let vision = match &config.vision_endpoint {
            Some(endpoint) => Some(Arc::new(HttpVision::new(endpoint)?) as Arc<dyn VisionCapability>),
            None => None,
        };
        let import = config
            .import_dir
            .as_ref()
            .map(|dir| Arc::new(JsonDropSink::new(dir)) as Arc<dyn ImportSink>);

        Ok(Self::new(
            config,
            ServiceDeps {
                launcher: Arc::new(launcher),
                vision,
                prompt: Arc::new(ConsolePrompt),
                recipes: Arc::new(JsonRecipeStore::new(&config.data_dir)),
                schedule: Arc::new(JsonScheduleStateStore::new(&config.data_dir)),
                import,
                clock: Arc::new(SystemClock),
            },
        ))
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Restore the persisted schedule
    pub async fn init(&self) -> ReplayResult<()> {
        self.scheduler.init().await
    }

    pub async fn start_recording_mode(&self, url: &str) -> ReplayResult<RecordingHandle> {
        self.recorder.start(url).await
    }

    pub async fn recording_status(&self) -> Option<RecordingStatus> {
        self.recorder.status().await
    }

    /// Stop recording and store the steps as a new recipe, which becomes the
    /// default for on-demand playback
    pub async fn save_recording(&self, name: &str, institution: Option<String>) -> ReplayResult<Recipe> {
        let status = self
            .recorder
            .status()
            .await
            .ok_or(ReplayError::RecordingNotActive)?;
        let steps = self.recorder.stop().await?;

        let recipe = Recipe::new(name, institution, &status.url, steps)?;
        self.recipes.save(&recipe).await?;
        self.recipes.set_default(&recipe.id).await?;
        log::info!(
            "Saved recipe {} ({} steps) as {}",
            recipe.display_name(),
            recipe.steps.len(),
            recipe.id
        );
        Ok(recipe)
    }

    /// Stop recording and throw the steps away
    pub async fn discard_recording(&self) -> ReplayResult<()> {
        match self.recorder.stop().await {
            Ok(_) | Err(ReplayError::EmptyRecording) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn list_recipes(&self) -> ReplayResult<Vec<Recipe>> {
        Ok(self.recipes.list().await?)
    }

    pub async fn get_recipe(&self, id: &str) -> ReplayResult<Recipe> {
        self.recipes
            .get(id)
            .await?
            .ok_or_else(|| ReplayError::RecipeNotFound(id.to_string()))
    }

    pub async fn delete_recipe(&self, id: &str) -> ReplayResult<()> {
        if !self.recipes.delete(id).await? {
            return Err(ReplayError::RecipeNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_default_recipe(&self, id: &str) -> ReplayResult<()> {
        self.get_recipe(id).await?;
        Ok(self.recipes.set_default(id).await?)
    }

    /// Replay a recipe now; `None` picks the default (else the newest) recipe
    pub async fn trigger_execute(&self, id: Option<&str>) -> ReplayResult<RunReport> {
        let recipe = self.pick(id).await?;
        self.run(&recipe, PlayOptions::default()).await
    }

    /// Replay, then pull the tables off the final page and hand them to the
    /// import pipeline
    pub async fn execute_via_structured_capture(&self, id: Option<&str>) -> ReplayResult<RunReport> {
        let recipe = self.pick(id).await?;
        let report = self.run(&recipe, PlayOptions { capture: true }).await?;

        match (&self.import, &report.extracted) {
            (Some(sink), Some(data)) => {
                sink.import(&recipe.id, data).await?;
                log::info!("Imported {} rows from {}", data.row_count(), recipe.name);
            }
            (None, Some(_)) => log::warn!("No import pipeline configured; extracted data dropped"),
            _ => {}
        }
        Ok(report)
    }

    /// Cancel the on-demand run or the scheduled run-all in progress
    pub fn cancel_execution(&self) -> bool {
        let on_demand = match self.active_run.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        on_demand | self.scheduler.cancel_current()
    }

    pub async fn edit_recipe(&self, id: &str, edit: RecipeEdit) -> ReplayResult<Recipe> {
        let mut recipe = self.get_recipe(id).await?;
        match edit {
            RecipeEdit::MoveStep { from, to } => recipe.move_step(from, to)?,
            RecipeEdit::DeleteStep { index } => recipe.delete_step(index)?,
            RecipeEdit::Step { index, edit } => recipe.edit_step(index, edit)?,
            RecipeEdit::Rename { name } => {
                if name.trim().is_empty() {
                    return Err(ReplayError::InvalidRecipe("name is empty".into()));
                }
                recipe.name = name;
                recipe.updated_at = chrono::Utc::now();
            }
            RecipeEdit::ScheduleEnabled(enabled) => {
                recipe.schedule_enabled = enabled;
                recipe.updated_at = chrono::Utc::now();
            }
        }
        recipe.validate()?;
        self.recipes.save(&recipe).await?;
        Ok(recipe)
    }

    async fn pick(&self, id: Option<&str>) -> ReplayResult<Recipe> {
        if let Some(id) = id {
            return self.get_recipe(id).await;
        }
        if let Some(id) = self.recipes.default_id().await? {
            if let Some(recipe) = self.recipes.get(&id).await? {
                return Ok(recipe);
            }
            log::warn!("Default recipe {} no longer exists", id);
        }
        self.recipes
            .list()
            .await?
            .into_iter()
            .max_by_key(|r| r.updated_at)
            .ok_or_else(|| ReplayError::RecipeNotFound("no recipes recorded".into()))
    }

    async fn run(&self, recipe: &Recipe, options: PlayOptions) -> ReplayResult<RunReport> {
        let guard = self
            .player
            .lock()
            .try_acquire(&format!("playback: {}", recipe.name))?;

        let cancel = CancellationToken::new();
        *self.active_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        let result = self.player.execute_locked(recipe, &guard, cancel, options).await;
        self.active_run.lock().unwrap_or_else(|e| e.into_inner()).take();
        result
    }
}
