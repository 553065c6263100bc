use super::dom::{crop_png, Bounds, PageElement, PageSnapshot, Point};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Kind of user interaction observed while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Input,
    Select,
}

/// One interaction pushed by the host into the recorder's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub target: PageElement,
    /// Pointer position; for input/select commits this is the element center
    pub pointer: Point,
    #[serde(default)]
    pub value: Option<String>,
    /// Page the interaction happened on
    #[serde(default)]
    pub page_url: Option<String>,
}

/// Failures a host reports inside an `anyhow::Error`
#[derive(Debug, Error)]
pub enum HostError {
    #[error("browser session closed")]
    SessionClosed,
    #[error("element {0} is no longer attached to the page")]
    Detached(u32),
}

/// Browser-session host primitives
///
/// A session is one live connection to an automatable browser. It is held by
/// at most one of the recorder or the player at a time.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page to a URL
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Read the DOM/ARIA descriptors of every relevant element
    async fn snapshot(&self) -> Result<PageSnapshot>;

    /// URL of the page currently shown
    async fn current_url(&self) -> Result<String> {
        Ok(self.snapshot().await?.url)
    }

    /// Capture the visible page as PNG bytes
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Capture part of the visible page as PNG bytes
    async fn screenshot_region(&self, bounds: Bounds) -> Result<Vec<u8>> {
        let full = self.screenshot().await?;
        crop_png(&full, bounds)
    }

    /// Click at a viewport position
    async fn click_at(&self, point: Point) -> Result<()>;

    /// Replace the value of an editable element and fire input/change events
    async fn set_value(&self, node_id: u32, value: &str) -> Result<()>;

    /// Choose an option of a select element by value or visible text
    async fn select_option(&self, node_id: u32, value: &str) -> Result<()>;

    /// Evaluate a script in the page and return its JSON result
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Start streaming user interactions into the bounded queue
    async fn start_capture(&self, sink: mpsc::Sender<InteractionEvent>) -> Result<()>;

    /// Stop streaming; the host must drop its sender so the consumer drains
    async fn stop_capture(&self) -> Result<()>;

    /// Release the underlying browser
    async fn close(&self) -> Result<()>;
}

/// Opens fresh browser sessions
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// True when the error chain says the host session is gone
pub fn is_session_lost(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<HostError>(),
            Some(HostError::SessionClosed) | Some(HostError::Detached(_))
        )
    })
}
