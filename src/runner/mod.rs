pub mod events;
pub mod lock;
pub mod player;
pub mod state;

pub use events::{ConsoleEventListener, EventEmitter, PlayerEvent};
pub use lock::{RunGuard, RunLock};
pub use player::{PlayOptions, Player, PlayerConfig};
pub use state::{PlayerState, RunReport, RunStatus, StepOutcome, StepStatus};
