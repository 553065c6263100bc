use thiserror::Error;

/// Errors surfaced by the recording, resolution, playback and scheduling engine
#[derive(Debug, Error)]
pub enum ReplayError {
    /// No resolver strategy matched the step
    #[error("no strategy matched step {index}")]
    ResolutionFailure { index: usize },

    /// The automation host terminated the session unexpectedly
    #[error("browser session lost: {0}")]
    SessionLost(String),

    /// Nobody answered the credential prompt in time
    #[error("no value supplied for '{field_label}' within {timeout_ms}ms")]
    RedactedValueTimeout { field_label: String, timeout_ms: u64 },

    #[error("credential prompt for '{0}' was cancelled")]
    PromptCancelled(String),

    /// The AI-vision strategy could not be used
    #[error("vision capability unavailable: {0}")]
    VisionCapabilityUnavailable(String),

    /// Another recording or playback holds the run lock
    #[error("another session holds the run lock ({holder})")]
    ScheduleOverlap { holder: String },

    #[error("recording produced no steps")]
    EmptyRecording,

    #[error("no recording in progress")]
    RecordingNotActive,

    #[error("a recording is already in progress")]
    RecordingActive,

    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("step index {index} out of range ({len} steps)")]
    StepIndexOutOfRange { index: usize, len: usize },

    #[error("refusing to store a literal value for sensitive step {index}")]
    SecretNotPersisted { index: usize },

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Host(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReplayError {
    /// Whether the player may retry the step that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReplayError::ResolutionFailure { .. } | ReplayError::SessionLost(_) | ReplayError::Host(_)
        )
    }
}

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
