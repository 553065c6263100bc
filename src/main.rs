use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use portal_replay::recipe::StepEdit;
use portal_replay::runner::{ConsoleEventListener, RunReport};
use portal_replay::scheduler::{SchedulerEvent, INTERVAL_TO_CRON};
use portal_replay::utils::config::Config;
use portal_replay::{RecipeEdit, ReplayResult, ReplayService};

#[derive(Parser)]
#[command(name = "portal-replay")]
#[command(version = "0.1.0")]
#[command(about = "Record a bank-portal session once, replay it unattended", long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/portal-replay/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a portal and record the steps you take
    Record {
        /// Page to start recording on
        url: String,

        /// Name of the new recipe
        #[arg(short, long)]
        name: String,

        /// Bank or institution the recipe belongs to
        #[arg(short, long)]
        institution: Option<String>,
    },

    /// Replay a recipe (the default recipe when no id is given)
    Play {
        id: Option<String>,

        /// Extract tables from the final page and hand them to the import directory
        #[arg(long, default_value = "false")]
        capture: bool,
    },

    /// List stored recipes
    List,

    /// Print a recipe as JSON
    Show { id: String },

    /// Edit a stored recipe
    Edit {
        id: String,

        #[command(subcommand)]
        command: EditCommands,
    },

    /// Manage the schedule
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Run the scheduler until Ctrl+C
    Daemon,

    /// List the named schedule intervals
    Intervals,
}

#[derive(Subcommand)]
enum EditCommands {
    /// Move a step to a new position
    Move { from: usize, to: usize },
    /// Delete a step
    Delete { index: usize },
    /// Set the literal value of an input or select step
    SetValue { index: usize, value: String },
    /// Set the prompt label of a step
    SetLabel { index: usize, label: String },
    /// Prompt for this step's value at run time instead of storing it
    Redact { index: usize, label: String },
    /// Rename the recipe
    Rename { name: String },
    /// Include or exclude the recipe from scheduled runs
    Scheduled {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Enable the schedule with a cron expression or interval name
    Start { expr: String },
    /// Disable the schedule
    Stop,
    /// Show the schedule state
    Status,
    /// Run every scheduled recipe now
    RunNow,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let service = ReplayService::from_config(&config)?;

    match cli.command {
        Commands::Record {
            url,
            name,
            institution,
        } => {
            service.start_recording_mode(&url).await?;
            println!("{} Recording on {}", "●".red().bold(), url.cyan());
            println!(
                "  Perform the steps in the browser, then press {} to save (Ctrl+C discards)",
                "Enter".bold()
            );

            let mut line = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                _ = stdin.read_line(&mut line) => {
                    let recipe = service.save_recording(&name, institution).await?;
                    println!(
                        "{} Saved {} with {} steps ({})",
                        "✓".green(),
                        recipe.display_name().cyan(),
                        recipe.steps.len(),
                        recipe.id.dimmed()
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    service.discard_recording().await?;
                    println!("{} Recording discarded", "○".yellow());
                }
            }
        }

        Commands::Play { id, capture } => {
            tokio::spawn(ConsoleEventListener::listen(service.player().events().subscribe()));

            let run = async {
                if capture {
                    service.execute_via_structured_capture(id.as_deref()).await
                } else {
                    service.trigger_execute(id.as_deref()).await
                }
            };
            tokio::pin!(run);

            let report = tokio::select! {
                report = &mut run => report?,
                _ = tokio::signal::ctrl_c() => {
                    service.cancel_execution();
                    run.await?
                }
            };
            exit_for(&report);
        }

        Commands::List => {
            let recipes = service.list_recipes().await?;
            if recipes.is_empty() {
                println!("No recipes recorded yet");
            }
            for recipe in recipes {
                let scheduled = if recipe.schedule_enabled {
                    "scheduled".green()
                } else {
                    "manual".dimmed()
                };
                println!(
                    "{}  {}  {} steps  [{}]  updated {}",
                    recipe.id.dimmed(),
                    recipe.display_name().cyan(),
                    recipe.steps.len(),
                    scheduled,
                    recipe.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Show { id } => {
            let recipe = service.get_recipe(&id).await?;
            println!("{}", serde_json::to_string_pretty(&recipe)?);
        }

        Commands::Edit { id, command } => {
            let edit = match command {
                EditCommands::Move { from, to } => RecipeEdit::MoveStep { from, to },
                EditCommands::Delete { index } => RecipeEdit::DeleteStep { index },
                EditCommands::SetValue { index, value } => RecipeEdit::Step {
                    index,
                    edit: StepEdit::Value { value: Some(value) },
                },
                EditCommands::SetLabel { index, label } => RecipeEdit::Step {
                    index,
                    edit: StepEdit::FieldLabel {
                        field_label: Some(label),
                    },
                },
                EditCommands::Redact { index, label } => RecipeEdit::Step {
                    index,
                    edit: StepEdit::Redact { field_label: label },
                },
                EditCommands::Rename { name } => RecipeEdit::Rename { name },
                EditCommands::Scheduled { enabled } => RecipeEdit::ScheduleEnabled(enabled),
            };
            let recipe = service.edit_recipe(&id, edit).await?;
            println!("{} Updated {}", "✓".green(), recipe.display_name().cyan());
            for (i, step) in recipe.steps.iter().enumerate() {
                println!("  [{}] {}", i, step.describe());
            }
        }

        Commands::Schedule { command } => schedule(&service, command).await?,

        Commands::Daemon => {
            service.init().await?;
            tokio::spawn(ConsoleEventListener::listen(service.player().events().subscribe()));
            let mut events = service.scheduler().subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let SchedulerEvent::TickSkipped { holder } = event {
                        println!("{} Tick skipped: {} in progress", "○".yellow(), holder);
                    }
                }
            });

            match service.scheduler().next_run_at() {
                Some(next) => println!("{} Next run at {}", "⏱".cyan(), next),
                None => println!("{} Schedule is not enabled", "○".yellow()),
            }
            tokio::signal::ctrl_c().await?;
            service.scheduler().shutdown();
            println!("Stopped");
        }

        Commands::Intervals => {
            for (name, expr) in INTERVAL_TO_CRON.iter() {
                println!("  {:<16} {}", name.cyan(), expr);
            }
        }
    }

    Ok(())
}

async fn schedule(service: &ReplayService, command: ScheduleCommands) -> ReplayResult<()> {
    let scheduler = service.scheduler();
    scheduler.init().await?;

    match command {
        ScheduleCommands::Start { expr } => {
            let state = scheduler.start(&expr).await?;
            println!(
                "{} Schedule enabled: {} {}",
                "✓".green(),
                state.cron_expr.unwrap_or_default().cyan(),
                state.interval.map(|i| format!("({})", i)).unwrap_or_default()
            );
            println!("  Run `portal-replay daemon` to keep it running");
        }
        ScheduleCommands::Stop => {
            scheduler.stop().await?;
            println!("{} Schedule disabled", "✓".green());
        }
        ScheduleCommands::Status => {
            let state = scheduler.status();
            println!(
                "  Enabled:  {}",
                if state.enabled { "yes".green() } else { "no".red() }
            );
            println!(
                "  Cron:     {} {}",
                state.cron_expr.as_deref().unwrap_or("-"),
                state.interval.as_deref().unwrap_or("")
            );
            println!(
                "  Last run: {}",
                state
                    .last_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
            if let Some(next) = scheduler.next_run_at() {
                println!("  Next run: {}", next.to_rfc3339());
            }
            for entry in state.run_log.iter().rev().take(10) {
                println!(
                    "  {} {:<24} {:?}{}",
                    entry.finished_at.format("%Y-%m-%d %H:%M"),
                    entry.recipe_name,
                    entry.status,
                    entry
                        .failed_step
                        .map(|s| format!(" at step {}", s))
                        .unwrap_or_default()
                );
            }
        }
        ScheduleCommands::RunNow => {
            tokio::spawn(ConsoleEventListener::listen(service.player().events().subscribe()));
            let summary = scheduler.run_all_now().await?;
            println!(
                "{} {} succeeded, {} failed{}",
                "■".blue().bold(),
                summary.succeeded,
                summary.failed,
                if summary.cancelled { ", cancelled" } else { "" }
            );
        }
    }
    scheduler.shutdown();
    Ok(())
}

fn exit_for(report: &RunReport) {
    if !report.succeeded() {
        std::process::exit(1);
    }
}
