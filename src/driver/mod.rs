pub mod dom;
pub mod traits;
pub mod web;

pub use dom::{Bounds, PageElement, PageSnapshot, Point, Viewport};
pub use traits::{BrowserSession, HostError, InteractionEvent, InteractionKind, SessionLauncher};
