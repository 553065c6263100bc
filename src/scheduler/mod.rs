//! Cron scheduler for unattended run-all playback

pub mod clock;
mod dispatcher;
pub mod expr;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{RunAllSummary, Scheduler, SchedulerEvent, Trigger};
pub use expr::{CronSpec, CRON_TO_INTERVAL, INTERVAL_TO_CRON};
pub use state::{RunLogEntry, RunLogStatus, ScheduleState, RUN_LOG_LIMIT};
