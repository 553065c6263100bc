//! External capabilities consumed by the engine

pub mod import;
pub mod prompt;
pub mod vision;

pub use import::{ExtractedTable, ExtractedTables, ImportSink, JsonDropSink};
pub use prompt::{ConsolePrompt, CredentialPrompt, Secret};
pub use vision::{HttpVision, VisionCapability, VisionError};
