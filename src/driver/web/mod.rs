mod driver;
pub mod scripts;

pub use driver::{WebLauncher, WebSession, WebSessionConfig};
