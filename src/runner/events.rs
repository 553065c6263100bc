use super::state::{RunReport, RunStatus};
use crate::resolver::Strategy;
use tokio::sync::broadcast;

/// Playback events for real-time updates
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    RunStarted {
        recipe_id: String,
        recipe_name: String,
        step_count: usize,
    },
    StepStarted {
        index: usize,
        description: String,
    },
    StepPassed {
        index: usize,
        strategy: Strategy,
        duration_ms: u64,
    },
    StepRetrying {
        index: usize,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
    Prompting {
        index: usize,
        field_label: String,
    },
    StepFailed {
        index: usize,
        error: String,
        duration_ms: u64,
    },
    StepSkipped {
        index: usize,
        reason: String,
    },
    RunFinished {
        report: RunReport,
    },
}

/// Event emitter for broadcasting playback events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<PlayerEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<PlayerEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let is_tty = std::io::stdout().is_terminal();
        let mut spinner: Option<ProgressBar> = None;
        let mut step_text = String::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                PlayerEvent::RunStarted {
                    recipe_name,
                    step_count,
                    ..
                } => {
                    println!(
                        "\n{} Replaying {} ({} steps)",
                        "▶".green().bold(),
                        recipe_name.cyan(),
                        step_count
                    );
                }

                PlayerEvent::StepStarted { index, description } => {
                    step_text = format!("[{}] {} ", index, description.dimmed());

                    let pb = if is_tty {
                        ProgressBar::new_spinner()
                    } else {
                        ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
                    };
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    pb.set_message(step_text.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinner = Some(pb);
                }

                PlayerEvent::StepPassed {
                    strategy,
                    duration_ms,
                    ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!(
                        "    {} {}via {} ({}ms)",
                        "✓".green(),
                        step_text,
                        strategy.name().cyan(),
                        duration_ms
                    );
                }

                PlayerEvent::StepRetrying {
                    attempt,
                    max_attempts,
                    delay_ms,
                    reason,
                    ..
                } => {
                    let msg = format!(
                        "{}{} {}",
                        step_text,
                        format!("↻ retry {}/{} in {}ms", attempt, max_attempts, delay_ms).yellow(),
                        reason.dimmed()
                    );
                    match &spinner {
                        Some(pb) if is_tty => pb.set_message(msg),
                        _ => println!("    {}", msg),
                    }
                }

                PlayerEvent::Prompting { field_label, .. } => {
                    // The prompt writes to the terminal itself
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("    {} waiting for {}", "⏸".yellow(), field_label.bold());
                }

                PlayerEvent::StepFailed {
                    error, duration_ms, ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!(
                        "    {} {}({}ms) {}",
                        "✗".red(),
                        step_text,
                        duration_ms,
                        error.red()
                    );
                }

                PlayerEvent::StepSkipped { index, reason } => {
                    println!("    {} [{}] {}", "○".yellow(), index, reason.dimmed());
                }

                PlayerEvent::RunFinished { report } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let status = match &report.status {
                        RunStatus::Succeeded => "SUCCEEDED".green().bold(),
                        RunStatus::Failed { step_index, .. } => {
                            format!("FAILED at step {}", step_index).red().bold()
                        }
                        RunStatus::Cancelled => "CANCELLED".yellow().bold(),
                    };
                    println!(
                        "{} {} [{}] {}/{} steps in {}ms",
                        "■".blue().bold(),
                        report.recipe_name,
                        status,
                        report.passed(),
                        report.steps.len(),
                        report.duration_ms
                    );
                    if let RunStatus::Failed { reason, .. } = &report.status {
                        println!("  {}", reason.red());
                    }
                    if let Some(data) = &report.extracted {
                        println!(
                            "  Captured {} rows from {} tables",
                            data.row_count(),
                            data.tables.len()
                        );
                    }
                }
            }
        }
    }
}
