//! Hand-off of structured capture to the downstream import pipeline

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One table scraped from the final page of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTable {
    #[serde(default)]
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Everything a structured capture produced
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTables {
    pub source_url: String,
    pub tables: Vec<ExtractedTable>,
}

impl ExtractedTables {
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Receives extracted data; parsing and categorizing happen downstream
#[async_trait]
pub trait ImportSink: Send + Sync {
    async fn import(&self, recipe_id: &str, data: &ExtractedTables) -> Result<()>;
}

/// Drops each capture as a timestamped JSON file for the import pipeline to pick up
pub struct JsonDropSink {
    dir: PathBuf,
}

impl JsonDropSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ImportSink for JsonDropSink {
    async fn import(&self, recipe_id: &str, data: &ExtractedTables) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = self.dir.join(format!("{}-{}.json", recipe_id, stamp));
        let json = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::info!(
            "Handed {} rows from {} tables to import: {}",
            data.row_count(),
            data.tables.len(),
            path.display()
        );
        Ok(())
    }
}
