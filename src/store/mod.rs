//! Persistence seams for recipes and schedule state

mod json;

use anyhow::Result;
use async_trait::async_trait;

use crate::recipe::Recipe;
use crate::scheduler::ScheduleState;

pub use json::{JsonRecipeStore, JsonScheduleStateStore};

/// Recipe CRUD keyed by id
#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// All recipes, oldest first
    async fn list(&self) -> Result<Vec<Recipe>>;
    async fn get(&self, id: &str) -> Result<Option<Recipe>>;
    async fn save(&self, recipe: &Recipe) -> Result<()>;
    /// Returns whether a recipe was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Id of the recipe on-demand playback uses
    async fn default_id(&self) -> Result<Option<String>>;
    async fn set_default(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait ScheduleStateStore: Send + Sync {
    /// `None` when nothing was persisted yet
    async fn load(&self) -> Result<Option<ScheduleState>>;
    async fn save(&self, state: &ScheduleState) -> Result<()>;
}
