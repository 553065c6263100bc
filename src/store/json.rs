use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{RecipeStore, ScheduleStateStore};
use crate::recipe::Recipe;
use crate::scheduler::ScheduleState;

/// Write through a sibling temp file so readers never see a torn file
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// One pretty-printed JSON file per recipe under `<data_dir>/recipes/`
pub struct JsonRecipeStore {
    dir: PathBuf,
}

impl JsonRecipeStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("recipes"),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // Ids become file names; reject anything that could escape the directory
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            anyhow::bail!("Invalid recipe id: {}", id);
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn default_marker(&self) -> PathBuf {
        self.dir.join("default")
    }
}

#[async_trait]
impl RecipeStore for JsonRecipeStore {
    async fn list(&self) -> Result<Vec<Recipe>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to list recipes"),
        };

        let mut recipes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Recipe>(&bytes) {
                Ok(recipe) => recipes.push(recipe),
                Err(e) => log::warn!("Skipping unreadable recipe {}: {}", path.display(), e),
            }
        }

        recipes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(recipes)
    }

    async fn get(&self, id: &str) -> Result<Option<Recipe>> {
        let path = self.path_for(id)?;
        match read_optional(&path).await? {
            Some(bytes) => {
                let recipe = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                Ok(Some(recipe))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, recipe: &Recipe) -> Result<()> {
        let path = self.path_for(&recipe.id)?;
        let json = serde_json::to_vec_pretty(recipe)?;
        write_atomic(&path, &json).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                if self.default_id().await?.as_deref() == Some(id) {
                    tokio::fs::remove_file(self.default_marker()).await.ok();
                }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn default_id(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.default_marker())
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    async fn set_default(&self, id: &str) -> Result<()> {
        self.path_for(id)?;
        write_atomic(&self.default_marker(), id.as_bytes()).await
    }
}

/// Schedule state persisted as `<data_dir>/schedule.json`
pub struct JsonScheduleStateStore {
    path: PathBuf,
}

impl JsonScheduleStateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("schedule.json"),
        }
    }
}

#[async_trait]
impl ScheduleStateStore for JsonScheduleStateStore {
    async fn load(&self) -> Result<Option<ScheduleState>> {
        match read_optional(&self.path).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("Failed to parse {}", self.path.display()))?,
            )),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &ScheduleState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::StepType;
    use crate::testing::{recipe, step};

    #[tokio::test]
    async fn test_recipe_store_crud() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecipeStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        let r = recipe(vec![step(StepType::Click, 1, "Login")]);
        store.save(&r).await.unwrap();
        store.set_default(&r.id).await.unwrap();

        let loaded = store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded, r);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.default_id().await.unwrap().as_deref(), Some(r.id.as_str()));

        assert!(store.delete(&r.id).await.unwrap());
        assert!(!store.delete(&r.id).await.unwrap());
        assert!(store.get(&r.id).await.unwrap().is_none());
        assert!(store.default_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recipe_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecipeStore::new(dir.path());
        assert!(store.get("../schedule").await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_state_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonScheduleStateStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());

        let state = ScheduleState {
            cron_expr: Some("0 0 * * *".into()),
            interval: Some("daily".into()),
            enabled: true,
            ..Default::default()
        };
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), state);
    }
}
