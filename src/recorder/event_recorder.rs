//! Capture Recorder
//!
//! Holds a browser session and the run lock for the duration of a recording.
//! The host pushes interactions into a bounded queue; a single consumer task
//! turns them into steps in arrival order.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::capture::{build_step, capture_visual, StepSequence};
use crate::capability::VisionCapability;
use crate::driver::{BrowserSession, InteractionEvent, SessionLauncher};
use crate::error::{ReplayError, ReplayResult};
use crate::recipe::Step;
use crate::runner::{RunGuard, RunLock};
use crate::utils::config::Config;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub queue_capacity: usize,
    /// Crop and describe each target for the visual strategy
    pub capture_visual: bool,
    /// Ask the vision backend to describe crops; otherwise describe locally
    pub describe_with_vision: bool,
    /// How long `stop` waits for queued interactions to drain
    pub drain_timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            capture_visual: true,
            describe_with_vision: false,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl RecorderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.interaction_queue_capacity.max(1),
            capture_visual: config.capture_visual,
            describe_with_vision: config.describe_with_vision,
            ..Default::default()
        }
    }
}

/// What a caller gets back from `start`
#[derive(Debug, Clone)]
pub struct RecordingHandle {
    pub url: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordingStatus {
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub steps: usize,
}

struct ActiveRecording {
    handle: RecordingHandle,
    session: Arc<dyn BrowserSession>,
    consumer: JoinHandle<Vec<Step>>,
    recorded: Arc<AtomicUsize>,
    guard: RunGuard,
}

pub struct EventRecorder {
    launcher: Arc<dyn SessionLauncher>,
    vision: Option<Arc<dyn VisionCapability>>,
    lock: RunLock,
    config: RecorderConfig,
    active: Mutex<Option<ActiveRecording>>,
}

impl EventRecorder {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        vision: Option<Arc<dyn VisionCapability>>,
        lock: RunLock,
        config: RecorderConfig,
    ) -> Self {
        Self {
            launcher,
            vision,
            lock,
            config,
            active: Mutex::new(None),
        }
    }

    /// Open the target page and start observing interactions
    pub async fn start(&self, url: &str) -> ReplayResult<RecordingHandle> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(ReplayError::RecordingActive);
        }

        let guard = self.lock.try_acquire(&format!("recording: {}", url))?;

        let session: Arc<dyn BrowserSession> = Arc::from(self.launcher.launch().await?);
        if let Err(e) = session.navigate(url).await {
            session.close().await.ok();
            return Err(e.into());
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let recorded = Arc::new(AtomicUsize::new(0));
        let consumer = tokio::spawn(consume(
            rx,
            session.clone(),
            self.describer(),
            self.config.capture_visual,
            recorded.clone(),
        ));

        if let Err(e) = session.start_capture(tx).await {
            consumer.abort();
            session.close().await.ok();
            return Err(e.into());
        }

        let handle = RecordingHandle {
            url: url.to_string(),
            started_at: Utc::now(),
        };
        log::info!("Recording started at {}", url);

        *active = Some(ActiveRecording {
            handle: handle.clone(),
            session,
            consumer,
            recorded,
            guard,
        });
        Ok(handle)
    }

    /// Stop observing and return the steps in the order they happened.
    /// An empty recording is discarded and reported as `EmptyRecording`.
    pub async fn stop(&self) -> ReplayResult<Vec<Step>> {
        let recording = self
            .active
            .lock()
            .await
            .take()
            .ok_or(ReplayError::RecordingNotActive)?;

        let ActiveRecording {
            handle,
            session,
            mut consumer,
            guard,
            ..
        } = recording;

        if let Err(e) = session.stop_capture().await {
            log::warn!("Failed to stop capture cleanly: {:#}", e);
        }

        let steps = match tokio::time::timeout(self.config.drain_timeout, &mut consumer).await {
            Ok(Ok(steps)) => Ok(steps),
            Ok(Err(e)) => Err(ReplayError::Host(anyhow::anyhow!(
                "recording consumer failed: {}",
                e
            ))),
            Err(_) => {
                consumer.abort();
                Err(ReplayError::Host(anyhow::anyhow!(
                    "interaction queue did not drain within {}ms",
                    self.config.drain_timeout.as_millis()
                )))
            }
        };

        if let Err(e) = session.close().await {
            log::warn!("Failed to close recording session: {:#}", e);
        }
        drop(guard);

        let steps = steps?;
        log::info!("Recording of {} stopped with {} steps", handle.url, steps.len());
        if steps.is_empty() {
            return Err(ReplayError::EmptyRecording);
        }
        Ok(steps)
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn status(&self) -> Option<RecordingStatus> {
        self.active.lock().await.as_ref().map(|r| RecordingStatus {
            url: r.handle.url.clone(),
            started_at: r.handle.started_at,
            steps: r.recorded.load(Ordering::SeqCst),
        })
    }

    fn describer(&self) -> Option<Arc<dyn VisionCapability>> {
        if self.config.describe_with_vision {
            self.vision.clone()
        } else {
            None
        }
    }
}

/// Events are drained after the fact, so a click that navigated has left the
/// page it was recorded on and a crop now would show the wrong content
async fn still_on(session: &dyn BrowserSession, page_url: Option<&str>) -> bool {
    let Some(expected) = page_url else {
        return true;
    };
    match session.current_url().await {
        Ok(url) if url == expected => true,
        Ok(url) => {
            log::debug!("Visual capture skipped: page moved from {} to {}", expected, url);
            false
        }
        Err(e) => {
            log::debug!("Visual capture skipped: {:#}", e);
            false
        }
    }
}

/// Single consumer of the interaction queue
async fn consume(
    mut rx: mpsc::Receiver<InteractionEvent>,
    session: Arc<dyn BrowserSession>,
    vision: Option<Arc<dyn VisionCapability>>,
    with_visual: bool,
    recorded: Arc<AtomicUsize>,
) -> Vec<Step> {
    let mut sequence = StepSequence::new();

    while let Some(event) = rx.recv().await {
        let timestamp = sequence.next_timestamp(event.timestamp);
        let mut step = build_step(&event, timestamp);

        if with_visual && still_on(session.as_ref(), event.page_url.as_deref()).await {
            step.visual = capture_visual(session.as_ref(), vision.as_deref(), &event.target).await;
        }

        log::debug!("Recorded {}", step.describe());
        sequence.push(event.target.node_id, step);
        recorded.store(sequence.len(), Ordering::SeqCst);
    }

    sequence.into_steps()
}
