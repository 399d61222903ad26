//! taskwatch-ctl: operator CLI for a local taskwatch store.
//!
//! Acts directly on the SQLite store the daemon uses, which makes it the
//! stand-in for the mobile client and back office in local deployments.
//!
//! ## Subcommands
//!
//! - `recording`: start, advance, stop and list live recordings
//! - `task`, `job`, `mechanic`: write or inspect documents
//! - `notifications`: list the audit trail

mod documents;
mod logging;
mod recording;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskwatch_core::{load_config, SqliteStore};

#[derive(Parser)]
#[command(name = "taskwatch-ctl")]
#[command(about = "Inspect and seed a local taskwatch store")]
#[command(version)]
struct Cli {
    /// Store database path (defaults to the daemon's configured store)
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live recordings, keyed by mechanic id
    Recording {
        #[command(subcommand)]
        action: RecordingAction,
    },

    /// Task documents
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Job documents
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Mechanic documents
    Mechanic {
        #[command(subcommand)]
        action: MechanicAction,
    },

    /// Notification audit records
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },
}

#[derive(Subcommand)]
enum RecordingAction {
    /// Create or replace a running recording
    Start {
        key: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "")]
        device: String,
        #[arg(long, default_value_t = 0)]
        duration: i64,
    },

    /// Write a duration as the client would
    SetDuration { key: String, seconds: i64 },

    /// Remove a recording from the live store
    Stop { key: String },

    /// Print every live recording
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task or merge fields into an existing one
    Put {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// Raw estimate, in whatever unit the reading path is configured for
        #[arg(long)]
        estimate: Option<f64>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        actual_time: Option<i64>,
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        notified: Option<bool>,
    },

    /// Print a task document
    Show { id: String },
}

#[derive(Subcommand)]
enum JobAction {
    /// Create a job or reassign its mechanic
    Put {
        id: String,
        #[arg(long)]
        mechanic: String,
    },
}

#[derive(Subcommand)]
enum MechanicAction {
    /// Create a mechanic or merge fields into an existing one
    Put {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum NotificationsAction {
    /// Print notification records, oldest first
    List {
        #[arg(long)]
        mechanic: Option<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "taskwatch-ctl failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let store = open_store(cli.store)?;

    let output = match cli.command {
        Commands::Recording { action } => match action {
            RecordingAction::Start {
                key,
                task,
                device,
                duration,
            } => recording::start(&store, &key, &task, &device, duration)?,
            RecordingAction::SetDuration { key, seconds } => {
                recording::set_duration(&store, &key, seconds)?
            }
            RecordingAction::Stop { key } => recording::stop(&store, &key)?,
            RecordingAction::List => recording::list(&store)?,
        },
        Commands::Task { action } => match action {
            TaskAction::Put {
                id,
                title,
                estimate,
                status,
                actual_time,
                job,
                notified,
            } => documents::put_task(
                &store,
                &id,
                documents::TaskFields {
                    title,
                    estimate,
                    status,
                    actual_time,
                    job,
                    notified,
                },
            )?,
            TaskAction::Show { id } => documents::show_task(&store, &id)?,
        },
        Commands::Job { action } => match action {
            JobAction::Put { id, mechanic } => documents::put_job(&store, &id, &mechanic)?,
        },
        Commands::Mechanic { action } => match action {
            MechanicAction::Put { id, name, device } => {
                documents::put_mechanic(&store, &id, name, device)?
            }
        },
        Commands::Notifications { action } => match action {
            NotificationsAction::List { mechanic } => {
                documents::list_notifications(&store, mechanic.as_deref())?
            }
        },
    };

    println!("{}", output);
    Ok(())
}

fn open_store(path: Option<PathBuf>) -> Result<SqliteStore, String> {
    let path = match path {
        Some(path) => path,
        None => load_config(None)?.store.resolve_path()?,
    };
    tracing::debug!(path = %path.display(), "Opening store");
    SqliteStore::open(path).map_err(|err| format!("Failed to open store: {}", err))
}
