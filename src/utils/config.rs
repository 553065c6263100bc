use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::driver::Viewport;
use crate::resolver::{ResolverConfig, Strategy, DEFAULT_STRUCTURAL_THRESHOLD};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where recipes and the schedule state are kept
    pub data_dir: PathBuf,

    /// Retries per step after the first attempt
    pub retry_attempts: u32,

    /// Base of the exponential backoff between retries (ms)
    pub retry_base_delay_ms: u64,

    /// Extra attempts after the browser session was lost
    pub session_lost_retries: u32,

    /// How long playback waits for a credential (ms)
    pub prompt_timeout_ms: u64,

    /// Enabled resolver strategies
    pub strategies: Vec<Strategy>,

    /// Minimum context similarity for a structural match
    pub structural_threshold: f64,

    /// Bound of the recorder's interaction queue
    pub interaction_queue_capacity: usize,

    /// Store a cropped screenshot and description for each recorded step
    pub capture_visual: bool,

    /// Describe recorded crops with the vision backend
    pub describe_with_vision: bool,

    pub headless: bool,
    pub viewport: Viewport,
    pub browser_executable: Option<PathBuf>,

    /// Base URL of the vision backend; unset disables the visual strategy
    pub vision_endpoint: Option<String>,

    /// Drop directory for extracted tables
    pub import_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("portal-replay"),
            retry_attempts: 3,
            retry_base_delay_ms: 2000,
            session_lost_retries: 1,
            prompt_timeout_ms: 120_000,
            strategies: Strategy::ALL.to_vec(),
            structural_threshold: DEFAULT_STRUCTURAL_THRESHOLD,
            interaction_queue_capacity: 256,
            capture_visual: true,
            describe_with_vision: false,
            headless: false,
            viewport: Viewport::default(),
            browser_executable: None,
            vision_endpoint: None,
            import_dir: None,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/portal-replay/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("portal-replay").join("config.yaml"))
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PORTAL_REPLAY_HEADLESS") {
            self.headless = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = var("PORTAL_REPLAY_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PORTAL_REPLAY_VISION_ENDPOINT") {
            self.vision_endpoint = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH") {
            self.browser_executable = Some(PathBuf::from(v));
        }
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            strategies: self.strategies.clone(),
            structural_threshold: self.structural_threshold,
        }
    }
}
