//! Browser host implementation using Playwright
//!
//! The host exposes the primitives the recorder and player need: DOM
//! snapshots, pointer clicks, value setting, screenshots and a polled
//! interaction stream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use playwright::api::{Browser, BrowserContext, Page, Viewport as PwViewport};
use playwright::Playwright;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scripts;
use crate::driver::dom::{PageSnapshot, Point, Viewport};
use crate::driver::traits::{BrowserSession, HostError, InteractionEvent, SessionLauncher};

/// Interval between drains of the in-page interaction queue
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Web session configuration
#[derive(Debug, Clone)]
pub struct WebSessionConfig {
    pub headless: bool,
    pub viewport: Viewport,
    /// Browser executable to use instead of the Playwright-managed one
    pub executable: Option<PathBuf>,
}

impl Default for WebSessionConfig {
    fn default() -> Self {
        let headless = std::env::var("PORTAL_REPLAY_HEADLESS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let executable = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
            .ok()
            .map(PathBuf::from);

        Self {
            headless,
            viewport: Viewport::default(),
            executable,
        }
    }
}

/// Launches Chromium sessions through Playwright
pub struct WebLauncher {
    config: WebSessionConfig,
}

impl WebLauncher {
    pub fn new(config: WebSessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for WebLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(WebSession::launch(self.config.clone()).await?))
    }
}

struct CaptureTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// One live Chromium page driven through Playwright
pub struct WebSession {
    #[allow(dead_code)]
    playwright: Arc<Playwright>,
    browser: Arc<Browser>,
    #[allow(dead_code)]
    context: Arc<BrowserContext>,
    page: Arc<Mutex<Page>>,
    viewport: Viewport,
    closed: Arc<AtomicBool>,
    capture: Mutex<Option<CaptureTask>>,
}

impl WebSession {
    /// Launch Chromium and open a blank page
    pub async fn launch(config: WebSessionConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let chromium = playwright.chromium();
        let mut launcher = chromium.launcher().headless(config.headless);
        if let Some(ref path) = config.executable {
            log::info!("Using browser executable {}", path.display());
            launcher = launcher.executable(path);
        }
        let browser = launcher
            .launch()
            .await
            .context("Failed to launch Chromium")?;

        let context = browser.context_builder().build().await?;
        let page = context.new_page().await?;

        page.set_viewport_size(PwViewport {
            width: config.viewport.width as i32,
            height: config.viewport.height as i32,
        })
        .await?;

        Ok(Self {
            playwright: Arc::new(playwright),
            browser: Arc::new(browser),
            context: Arc::new(context),
            page: Arc::new(Mutex::new(page)),
            viewport: config.viewport,
            closed: Arc::new(AtomicBool::new(false)),
            capture: Mutex::new(None),
        })
    }

    /// Map a Playwright error, flagging dead sessions so the player can tell them apart
    fn host_error(&self, err: impl std::fmt::Display, action: &str) -> anyhow::Error {
        classify(&self.closed, err, action)
    }

    async fn evaluate_with<T: serde::Serialize + Send + Sync>(
        &self,
        script: &str,
        arg: T,
        action: &str,
    ) -> Result<serde_json::Value> {
        self.ensure_open()?;
        let page = self.page.lock().await;
        page.evaluate::<T, serde_json::Value>(script, arg)
            .await
            .map_err(|e| self.host_error(e, action))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::SessionClosed.into());
        }
        Ok(())
    }
}

fn classify(closed: &AtomicBool, err: impl std::fmt::Display, action: &str) -> anyhow::Error {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if closed.load(Ordering::SeqCst)
        || lower.contains("target closed")
        || lower.contains("has been closed")
        || lower.contains("browser has disconnected")
    {
        anyhow::Error::new(HostError::SessionClosed).context(format!("{}: {}", action, message))
    } else {
        anyhow::anyhow!("{}: {}", action, message)
    }
}

#[async_trait]
impl BrowserSession for WebSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_open()?;
        let page = self.page.lock().await;
        page.goto_builder(url)
            .goto()
            .await
            .map_err(|e| self.host_error(e, "Failed to navigate to URL"))?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot> {
        let value = self
            .evaluate_with(&scripts::snapshot_script(), (), "Failed to read page")
            .await?;
        let mut snapshot: PageSnapshot =
            serde_json::from_value(value).context("Malformed page snapshot")?;
        if snapshot.viewport.width == 0 || snapshot.viewport.height == 0 {
            snapshot.viewport = self.viewport;
        }
        Ok(snapshot)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let page = self.page.lock().await;
        page.screenshot_builder()
            .r#type(playwright::api::ScreenshotType::Png)
            .screenshot()
            .await
            .map_err(|e| self.host_error(e, "Failed to take screenshot"))
    }

    async fn click_at(&self, point: Point) -> Result<()> {
        self.ensure_open()?;
        let page = self.page.lock().await;
        page.mouse
            .r#move(point.x, point.y, None)
            .await
            .map_err(|e| self.host_error(e, "Failed to move pointer"))?;
        page.mouse
            .down(None, None)
            .await
            .map_err(|e| self.host_error(e, "Failed to press pointer"))?;
        page.mouse
            .up(None, None)
            .await
            .map_err(|e| self.host_error(e, "Failed to release pointer"))?;
        Ok(())
    }

    async fn set_value(&self, node_id: u32, value: &str) -> Result<()> {
        let arg = serde_json::json!({ "node": node_id, "value": value });
        let done = self
            .evaluate_with(&scripts::set_value_script(), arg, "Failed to set value")
            .await?;
        if done.as_bool() != Some(true) {
            return Err(HostError::Detached(node_id).into());
        }
        Ok(())
    }

    async fn select_option(&self, node_id: u32, value: &str) -> Result<()> {
        let arg = serde_json::json!({ "node": node_id, "value": value });
        let done = self
            .evaluate_with(&scripts::select_option_script(), arg, "Failed to select option")
            .await?;
        if done.as_bool() != Some(true) {
            anyhow::bail!("Option '{}' not available on element {}", value, node_id);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let href = self
            .evaluate_with("() => location.href", (), "Failed to read page URL")
            .await?;
        Ok(href.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.evaluate_with(script, (), "Failed to evaluate script").await
    }

    async fn start_capture(&self, sink: mpsc::Sender<InteractionEvent>) -> Result<()> {
        self.evaluate_with(&scripts::capture_script(), (), "Failed to install capture")
            .await?;

        let stop = CancellationToken::new();
        let page = self.page.clone();
        let closed = self.closed.clone();
        let token = stop.clone();
        let install = scripts::capture_script();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(CAPTURE_POLL_INTERVAL) => {}
                }

                let drained = {
                    let page = page.lock().await;
                    // Listeners are lost on navigation, so reinstall before draining
                    if let Err(e) = page.evaluate::<(), serde_json::Value>(&install, ()).await {
                        log::debug!("Capture reinstall failed: {}", e);
                    }
                    page.evaluate::<(), Vec<serde_json::Value>>(scripts::DRAIN_SCRIPT, ())
                        .await
                };

                let events = match drained {
                    Ok(events) => events,
                    Err(e) => {
                        if closed.load(Ordering::SeqCst) {
                            break;
                        }
                        log::debug!("Capture drain failed: {}", e);
                        continue;
                    }
                };

                for raw in events {
                    match serde_json::from_value::<InteractionEvent>(raw) {
                        Ok(event) => {
                            if sink.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => log::warn!("Dropping malformed interaction event: {}", e),
                    }
                }
            }
        });

        let mut capture = self.capture.lock().await;
        if let Some(previous) = capture.replace(CaptureTask { stop, handle }) {
            previous.stop.cancel();
        }
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        let task = self.capture.lock().await.take();
        if let Some(task) = task {
            task.stop.cancel();
            // Joining drops the task's sender so the recorder's consumer drains
            if let Err(e) = task.handle.await {
                log::warn!("Capture task ended abnormally: {}", e);
            }
        }
        if !self.closed.load(Ordering::SeqCst) {
            let page = self.page.lock().await;
            page.evaluate::<(), serde_json::Value>(scripts::STOP_CAPTURE_SCRIPT, ())
                .await
                .ok();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self.capture.lock().await.take() {
            task.stop.cancel();
            task.handle.abort();
        }
        self.browser
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close browser: {}", e))?;
        log::debug!("Browser session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_marks_closed_targets() {
        let closed = AtomicBool::new(false);
        let err = classify(&closed, "Protocol error: Target closed", "Failed to click");
        assert!(crate::driver::traits::is_session_lost(&err));

        let err = classify(&closed, "Timeout 30000ms exceeded", "Failed to click");
        assert!(!crate::driver::traits::is_session_lost(&err));

        closed.store(true, Ordering::SeqCst);
        let err = classify(&closed, "anything", "Failed to click");
        assert!(crate::driver::traits::is_session_lost(&err));
    }
}
