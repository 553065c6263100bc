mod edit;
pub mod types;

pub use edit::StepEdit;
pub use types::{
    BoundingBox, Coordinates, Identification, Recipe, Step, StepContext, StepType, Visual,
    VisualCapture, REDACTED_SENTINEL,
};
