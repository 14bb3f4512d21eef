use crate::infra::{KeywordClassifier, LoggingGateway};
use crate::server;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use interview_pipeline::config::AppConfig;
use interview_pipeline::error::AppError;
use interview_pipeline::workflows::interview::{
    ActionId, AdjustMode, Period, Pipeline, SubjectId,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "Interview Pipeline",
    about = "Run the candidate interview pipeline or maintain its data directory",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and scheduler (default command)
    Serve(ServeArgs),
    /// Inspect or lift exclusions
    Bans {
        #[command(subcommand)]
        command: BanCommand,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Inspect or cancel queued delayed moderation actions
    Actions {
        #[command(subcommand)]
        command: ActionCommand,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Monthly interviewer statistics
    Stats {
        #[command(subcommand)]
        command: StatsCommand,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Correct interview records by hand
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
        #[command(flatten)]
        data: DataArgs,
    },
    /// List passed candidates grouped by interviewer
    Candidates {
        #[command(flatten)]
        data: DataArgs,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the directory holding the pipeline documents
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Override the directory holding the pipeline documents
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum BanCommand {
    /// Print active exclusions
    List,
    /// Lift the exclusion of one subject
    Clear { subject_id: u64 },
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// Print queued actions
    List,
    /// Remove a queued action before it runs
    Cancel { action_id: ActionId },
}

#[derive(Subcommand, Debug)]
enum StatsCommand {
    /// Print the report for one month (defaults to the current month)
    Show {
        #[arg(long)]
        period: Option<Period>,
    },
    /// Re-render every statistics projection immediately
    Refresh,
}

#[derive(Subcommand, Debug)]
enum RecordsCommand {
    /// Add, remove, or set manual interview entries for an interviewer
    Adjust {
        interviewer_id: u64,
        mode: AdjustMode,
        count: usize,
        #[arg(long)]
        period: Option<Period>,
    },
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Bans { command, data } => {
            let pipeline = open_pipeline(data).await?;
            match command {
                BanCommand::List => print_json(&pipeline.admin.list_bans(Utc::now()).await?),
                BanCommand::Clear { subject_id } => {
                    let removed = pipeline.admin.clear_ban(SubjectId(subject_id)).await?;
                    print_json(&serde_json::json!({ "subject_id": subject_id, "removed": removed }))
                }
            }
        }
        Command::Actions { command, data } => {
            let pipeline = open_pipeline(data).await?;
            match command {
                ActionCommand::List => print_json(&pipeline.admin.list_actions()),
                ActionCommand::Cancel { action_id } => {
                    let cancelled = pipeline.admin.cancel_action(action_id).await?;
                    print_json(&serde_json::json!({ "action_id": action_id, "cancelled": cancelled }))
                }
            }
        }
        Command::Stats { command, data } => {
            let pipeline = open_pipeline(data).await?;
            match command {
                StatsCommand::Show { period } => {
                    let period = period.unwrap_or_else(|| pipeline.admin.current_period(Utc::now()));
                    print_json(&pipeline.admin.monthly_report(period).await?)
                }
                StatsCommand::Refresh => {
                    let months = pipeline.admin.refresh_stats_now(Utc::now()).await?;
                    print_json(&serde_json::json!({ "months": months }))
                }
            }
        }
        Command::Records {
            command:
                RecordsCommand::Adjust {
                    interviewer_id,
                    mode,
                    count,
                    period,
                },
            data,
        } => {
            let pipeline = open_pipeline(data).await?;
            let period = period.unwrap_or_else(|| pipeline.admin.current_period(Utc::now()));
            let report = pipeline
                .admin
                .adjust_interview_count(SubjectId(interviewer_id), mode, count, period)
                .await?;
            print_json(&report)
        }
        Command::Candidates { data } => {
            let pipeline = open_pipeline(data).await?;
            print_json(&pipeline.admin.list_candidates_by_interviewer().await?)
        }
    }
}

/// Maintenance commands run without a platform adapter; outbound calls are only logged.
async fn open_pipeline(data: DataArgs) -> Result<Pipeline, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(data_dir) = data.data_dir {
        config.pipeline.data_dir = data_dir;
    }
    let gateway = Arc::new(LoggingGateway::new(config.pipeline.primary_community));
    Ok(Pipeline::open(&config.pipeline, gateway, Arc::new(KeywordClassifier)).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(std::io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}
