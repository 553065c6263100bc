//! In-memory fakes and builders shared by the unit tests

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::capability::{CredentialPrompt, Secret, VisionCapability, VisionError};
use crate::driver::{
    Bounds, BrowserSession, HostError, InteractionEvent, PageElement, PageSnapshot, Point,
    SessionLauncher,
};
use crate::recipe::{Coordinates, Identification, Recipe, Step, StepType};
use crate::scheduler::ScheduleState;
use crate::store::{RecipeStore, ScheduleStateStore};

pub const TEST_URL: &str = "https://bank.example/login";

/// Visible interactive element at (100, 100) sized 80x30
pub fn element(node_id: u32, tag: &str, text: &str) -> PageElement {
    let role = match tag {
        "button" => Some("button".to_string()),
        "input" | "textarea" => Some("textbox".to_string()),
        "select" => Some("combobox".to_string()),
        "a" => Some("link".to_string()),
        _ => None,
    };
    PageElement {
        node_id,
        tag: tag.to_string(),
        role,
        text: text.to_string(),
        bounds: Bounds::new(100.0, 100.0, 80.0, 30.0),
        interactive: true,
        visible: true,
        ..Default::default()
    }
}

/// Step recorded on the center of a default `element`
pub fn step(step_type: StepType, timestamp: i64, text: &str) -> Step {
    Step {
        step_type,
        timestamp,
        identification: Identification {
            text: Some(text.to_string()),
            ..Default::default()
        },
        context: Default::default(),
        visual: Default::default(),
        coordinates: Coordinates {
            x: 140.0,
            y: 115.0,
            element_x: 140.0,
            element_y: 115.0,
        },
        value: match step_type {
            StepType::Click => None,
            _ => Some("value".to_string()),
        },
        field_label: None,
    }
}

pub fn recipe(steps: Vec<Step>) -> Recipe {
    let now = chrono::Utc::now();
    Recipe {
        id: uuid::Uuid::new_v4().to_string(),
        name: "Test Bank".to_string(),
        institution: None,
        url: TEST_URL.to_string(),
        steps,
        created_at: now,
        updated_at: now,
        schedule_enabled: true,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(Point),
    SetValue { node: u32, value: String },
    Select { node: u32, value: String },
}

struct SessionInner {
    page: Mutex<PageSnapshot>,
    actions: Mutex<Vec<Action>>,
    navigations: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_actions: AtomicUsize,
    evaluate_result: Mutex<serde_json::Value>,
    capture: Mutex<Option<mpsc::Sender<InteractionEvent>>>,
}

/// Scriptable browser session; clones share state
#[derive(Clone)]
pub struct FakeSession {
    inner: Arc<SessionInner>,
}

impl FakeSession {
    pub fn with_elements(elements: Vec<PageElement>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                page: Mutex::new(PageSnapshot {
                    url: TEST_URL.to_string(),
                    elements,
                    ..Default::default()
                }),
                actions: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                fail_actions: AtomicUsize::new(0),
                evaluate_result: Mutex::new(serde_json::json!([])),
                capture: Mutex::new(None),
            }),
        }
    }

    pub fn page(&self) -> PageSnapshot {
        self.inner.page.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.inner.actions.lock().unwrap().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.navigations.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Simulate the browser going away
    pub fn close_now(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.capture.lock().unwrap().take();
    }

    fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }

    /// The next `n` page actions fail as if the browser had closed
    pub fn fail_next_actions(&self, n: usize) {
        self.inner.fail_actions.store(n, Ordering::SeqCst);
    }

    pub fn set_evaluate_result(&self, value: serde_json::Value) {
        *self.inner.evaluate_result.lock().unwrap() = value;
    }

    /// Push an interaction as the page would while capturing
    pub async fn emit(&self, event: InteractionEvent) {
        let tx = self.inner.capture.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(event).await.unwrap();
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::SessionClosed.into());
        }
        Ok(())
    }

    fn act(&self, action: Action) -> Result<()> {
        self.check_open()?;
        let failing = self
            .inner
            .fail_actions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HostError::SessionClosed.into());
        }
        self.inner.actions.lock().unwrap().push(action);
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.check_open()?;
        self.inner.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot> {
        self.check_open()?;
        Ok(self.page())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.check_open()?;
        Ok(b"\x89PNG-full".to_vec())
    }

    async fn screenshot_region(&self, _bounds: Bounds) -> Result<Vec<u8>> {
        self.check_open()?;
        Ok(b"\x89PNG-crop".to_vec())
    }

    async fn click_at(&self, point: Point) -> Result<()> {
        self.act(Action::Click(point))
    }

    async fn set_value(&self, node_id: u32, value: &str) -> Result<()> {
        self.act(Action::SetValue {
            node: node_id,
            value: value.to_string(),
        })
    }

    async fn select_option(&self, node_id: u32, value: &str) -> Result<()> {
        self.act(Action::Select {
            node: node_id,
            value: value.to_string(),
        })
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        self.check_open()?;
        Ok(self.inner.evaluate_result.lock().unwrap().clone())
    }

    async fn start_capture(&self, sink: mpsc::Sender<InteractionEvent>) -> Result<()> {
        self.check_open()?;
        *self.inner.capture.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        self.inner.capture.lock().unwrap().take();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_now();
        Ok(())
    }
}

/// Hands out the same fake session, reopened, on every launch
pub struct FakeLauncher {
    session: FakeSession,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(session: FakeSession) -> Self {
        Self {
            session,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.session.reopen();
        Ok(Box::new(self.session.clone()))
    }
}

enum VisionBehavior {
    Point(Option<Point>),
    Describe(String),
    Fail { unavailable: bool, message: String },
}

pub struct FakeVision {
    behavior: VisionBehavior,
    locate_calls: AtomicUsize,
}

impl FakeVision {
    fn with(behavior: VisionBehavior) -> Self {
        Self {
            behavior,
            locate_calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(point: Option<Point>) -> Self {
        Self::with(VisionBehavior::Point(point))
    }

    pub fn describing(description: &str) -> Self {
        Self::with(VisionBehavior::Describe(description.to_string()))
    }

    pub fn failing(error: VisionError) -> Self {
        let (unavailable, message) = match error {
            VisionError::Unavailable(m) => (true, m),
            VisionError::Transient(m) => (false, m),
        };
        Self::with(VisionBehavior::Fail {
            unavailable,
            message,
        })
    }

    pub fn locate_calls(&self) -> usize {
        self.locate_calls.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<VisionError> {
        match &self.behavior {
            VisionBehavior::Fail {
                unavailable: true,
                message,
            } => Some(VisionError::Unavailable(message.clone())),
            VisionBehavior::Fail { message, .. } => Some(VisionError::Transient(message.clone())),
            _ => None,
        }
    }
}

#[async_trait]
impl VisionCapability for FakeVision {
    async fn locate(&self, _screenshot: &[u8], _description: &str) -> Result<Option<Point>, VisionError> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.error() {
            return Err(e);
        }
        match &self.behavior {
            VisionBehavior::Point(p) => Ok(*p),
            _ => Ok(None),
        }
    }

    async fn describe(&self, _crop: &[u8]) -> Result<String, VisionError> {
        if let Some(e) = self.error() {
            return Err(e);
        }
        match &self.behavior {
            VisionBehavior::Describe(d) => Ok(d.clone()),
            _ => Ok("element".to_string()),
        }
    }
}

/// Answers every prompt with a fixed value, or declines
pub struct FakePrompt {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl FakePrompt {
    pub fn answering(value: &str) -> Self {
        Self {
            answer: Some(value.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn declining() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialPrompt for FakePrompt {
    async fn request(&self, _field_label: &str) -> Result<Option<Secret>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.as_deref().map(Secret::new))
    }
}

/// A prompt nobody ever answers
pub struct PendingPrompt;

#[async_trait]
impl CredentialPrompt for PendingPrompt {
    async fn request(&self, _field_label: &str) -> Result<Option<Secret>> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct MemoryRecipeStore {
    recipes: Mutex<Vec<Recipe>>,
    default_id: Mutex<Option<String>>,
}

impl MemoryRecipeStore {
    pub fn with(recipes: Vec<Recipe>) -> Self {
        Self {
            recipes: Mutex::new(recipes),
            default_id: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecipeStore for MemoryRecipeStore {
    async fn list(&self) -> Result<Vec<Recipe>> {
        Ok(self.recipes.lock().unwrap().clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Recipe>> {
        Ok(self.recipes.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn save(&self, recipe: &Recipe) -> Result<()> {
        let mut recipes = self.recipes.lock().unwrap();
        match recipes.iter_mut().find(|r| r.id == recipe.id) {
            Some(existing) => *existing = recipe.clone(),
            None => recipes.push(recipe.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut recipes = self.recipes.lock().unwrap();
        let before = recipes.len();
        recipes.retain(|r| r.id != id);
        let mut default_id = self.default_id.lock().unwrap();
        if default_id.as_deref() == Some(id) {
            *default_id = None;
        }
        Ok(recipes.len() != before)
    }

    async fn default_id(&self) -> Result<Option<String>> {
        Ok(self.default_id.lock().unwrap().clone())
    }

    async fn set_default(&self, id: &str) -> Result<()> {
        *self.default_id.lock().unwrap() = Some(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<ScheduleState>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn with(state: ScheduleState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> Option<ScheduleState> {
        self.state.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleStateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<ScheduleState>> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, state: &ScheduleState) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}
