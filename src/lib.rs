pub mod capability;
pub mod driver;
pub mod error;
pub mod recipe;
pub mod recorder;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export common items
pub use error::{ReplayError, ReplayResult};
pub use recipe::{Recipe, Step};
pub use service::{RecipeEdit, ReplayService, ServiceDeps};
