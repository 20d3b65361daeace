use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use mlog_proto::{
    FilterField, Mission, MissionDraft, MissionPatch, MissionQuery, MissionSortKey, MissionStatus,
    MissionType, SortOrder,
};
use mlog_syncd::client::{ApiClient, ClientError, Source, WriteOutcome};
use mlog_syncd::config::{expand_home, load_syncd_config, SyncdConfig};
use mlog_syncd::connectivity::{spawn_route_presence, ConnectivityMonitor, HttpProbe};
use mlog_syncd::database::LocalDb;
use mlog_syncd::events::EventListener;
use mlog_syncd::queue::PendingQueue;
use mlog_syncd::reconciler::SyncReconciler;
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mlog-syncd", about = "Offline-first mission log client and sync daemon")]
#[command(version)]
struct Cli {
    /// Path to client configuration file
    #[arg(long, default_value = "~/.config/mlog/client.toml", global = true)]
    config: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync daemon in the foreground
    Run,

    /// Work with missions
    #[command(subcommand)]
    Missions(MissionCommands),

    /// Show writes waiting to be synced
    Pending,

    /// Log in and remember the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Two-factor code
        #[arg(long)]
        token: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the stored session
    Logout,
}

#[derive(Subcommand)]
enum MissionCommands {
    /// List missions
    #[command(name = "ls")]
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        filter_type: Option<FilterField>,
        #[arg(long)]
        sort_by: Option<MissionSortKey>,
        #[arg(long)]
        sort_order: Option<SortOrder>,
    },

    /// Show a single mission
    Show { id: i64 },

    /// Create a mission
    Create(MissionFields),

    /// Replace every field of a mission
    Update {
        id: i64,
        #[command(flatten)]
        fields: MissionFields,
    },

    /// Change some fields of a mission
    Patch {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        status: Option<MissionStatus>,
        #[arg(long = "type")]
        mission_type: Option<MissionType>,
        #[arg(long)]
        destination: Option<String>,
        #[arg(long)]
        launch_date: Option<NaiveDate>,
        #[arg(long)]
        budget: Option<f64>,
        /// Comma-separated crew member names
        #[arg(long, value_delimiter = ',')]
        crew: Option<Vec<String>>,
    },

    /// Delete a mission
    #[command(name = "rm")]
    Delete { id: i64 },
}

#[derive(ClapArgs)]
struct MissionFields {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "Ongoing")]
    status: MissionStatus,
    #[arg(long = "type")]
    mission_type: MissionType,
    #[arg(long)]
    destination: String,
    /// YYYY-MM-DD
    #[arg(long)]
    launch_date: NaiveDate,
    #[arg(long)]
    budget: f64,
    /// Comma-separated crew member names
    #[arg(long, value_delimiter = ',')]
    crew: Vec<String>,
}

impl From<MissionFields> for MissionDraft {
    fn from(fields: MissionFields) -> Self {
        MissionDraft {
            name: fields.name,
            status: fields.status,
            mission_type: fields.mission_type,
            destination: fields.destination,
            launch_date: fields.launch_date,
            budget: fields.budget,
            crew_members: fields.crew,
        }
    }
}

struct App {
    config: SyncdConfig,
    db: Arc<LocalDb>,
    queue: Arc<PendingQueue>,
    client: Arc<ApiClient>,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    let config_path = expand_home(&cli.config);
    let config = load_syncd_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let db = Arc::new(LocalDb::new(&config.database_path())?);
    let queue = Arc::new(PendingQueue::new(db.clone(), config.drain_policy));
    let client = Arc::new(ApiClient::new(&config, db.clone(), queue.clone())?);
    let app = App {
        config,
        db,
        queue,
        client,
        json: cli.json,
    };

    match cli.command {
        Commands::Run => run_daemon(app).await,
        Commands::Missions(cmd) => missions(&app, cmd).await,
        Commands::Pending => pending(&app),
        Commands::Login {
            username,
            password,
            token,
        } => {
            let login = app.client.login(&username, &password, token).await?;
            println!("Logged in as {} ({})", login.user.username, login.user.role);
            Ok(())
        }
        Commands::Register { username, password } => {
            let user = app.client.register(&username, &password).await?;
            println!("Registered {} (id {})", user.username, user.id);
            Ok(())
        }
        Commands::Logout => {
            app.client.logout()?;
            println!("Session cleared");
            Ok(())
        }
    }
}

async fn run_daemon(app: App) -> Result<()> {
    tracing::info!(
        api_url = %app.config.api_url,
        policy = ?app.config.drain_policy,
        pending = app.queue.len()?,
        "mlog-syncd v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let (presence, presence_task) = spawn_route_presence(app.config.presence_interval());
    let probe = Arc::new(HttpProbe::new(app.config.api_base(), app.config.request_timeout())?);
    let monitor = ConnectivityMonitor::new(probe, presence, app.config.probe_interval());
    let (online, monitor_task) = monitor.spawn();

    let reconciler = SyncReconciler::new(app.queue.clone(), app.client.clone());
    let reconciler_task = tokio::spawn(reconciler.run(online.clone()));

    let (tx, mut new_missions) = tokio::sync::mpsc::unbounded_channel();
    let listener = EventListener::new(app.config.api_base(), app.db.clone(), tx);
    let listener_task = tokio::spawn(listener.run(online.clone()));

    let mut status = online;
    loop {
        tokio::select! {
            Some(mission) = new_missions.recv() => {
                print_new_mission(&mission, app.json)?;
            }

            changed = status.changed() => {
                if changed.is_err() {
                    tracing::warn!("connectivity monitor stopped");
                    break;
                }
                let up = *status.borrow_and_update();
                if up {
                    tracing::info!("online");
                } else {
                    tracing::warn!("offline, writes will be queued");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping mlog-syncd");
                break;
            }
        }
    }

    for task in [presence_task, monitor_task, reconciler_task, listener_task] {
        task.abort();
    }
    Ok(())
}

fn print_new_mission(mission: &Mission, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(mission)?);
    } else {
        println!("new mission: {}", describe(mission));
    }
    Ok(())
}

async fn missions(app: &App, cmd: MissionCommands) -> Result<()> {
    match cmd {
        MissionCommands::List {
            search,
            filter_type,
            sort_by,
            sort_order,
        } => {
            let query = MissionQuery {
                search,
                filter_type,
                sort_by,
                sort_order,
            };
            let (missions, source) = app.client.list_missions(&query).await?;
            if app.json {
                return print_json(&missions);
            }
            if source == Source::Cache {
                println!("(offline: showing cached missions)");
            }
            if missions.is_empty() {
                println!("No missions");
            }
            for mission in &missions {
                println!("{}", describe(mission));
            }
            Ok(())
        }
        MissionCommands::Show { id } => {
            let (mission, source) = app.client.get_mission(id).await?;
            let Some(mission) = mission else {
                bail!("mission {} not found", id);
            };
            if app.json {
                return print_json(&mission);
            }
            if source == Source::Cache {
                println!("(offline: cached copy)");
            }
            println!("{}", describe(&mission));
            println!("  type: {}", mission.mission_type);
            println!("  budget: {:.2}", mission.budget);
            if !mission.crew_members.is_empty() {
                println!("  crew: {}", mission.crew_members.join(", "));
            }
            for assignment in &mission.assignments {
                println!(
                    "  crew member #{}: {}",
                    assignment.crew_member_id, assignment.role_in_mission
                );
            }
            Ok(())
        }
        MissionCommands::Create(fields) => {
            let outcome = app.client.create_mission(fields.into()).await;
            report_write(app, outcome)
        }
        MissionCommands::Update { id, fields } => {
            let outcome = app.client.update_mission(id, fields.into()).await;
            report_write(app, outcome)
        }
        MissionCommands::Patch {
            id,
            name,
            status,
            mission_type,
            destination,
            launch_date,
            budget,
            crew,
        } => {
            let patch = MissionPatch {
                name,
                status,
                mission_type,
                destination,
                launch_date,
                budget,
                crew_members: crew,
            };
            if patch.is_empty() {
                bail!("nothing to change");
            }
            let outcome = app.client.patch_mission(id, patch).await;
            report_write(app, outcome)
        }
        MissionCommands::Delete { id } => match app.client.delete_mission(id).await? {
            WriteOutcome::Applied(()) => {
                println!("Deleted mission {}", id);
                Ok(())
            }
            WriteOutcome::Queued { seq } => {
                println!("Server unreachable: delete queued as #{} and will be synced", seq);
                Ok(())
            }
        },
    }
}

fn report_write(app: &App, outcome: Result<WriteOutcome<Mission>, ClientError>) -> Result<()> {
    match outcome? {
        WriteOutcome::Applied(mission) => {
            if app.json {
                print_json(&mission)
            } else {
                println!("Saved {}", describe(&mission));
                Ok(())
            }
        }
        WriteOutcome::Queued { seq } => {
            println!("Server unreachable: change queued as #{} and will be synced", seq);
            Ok(())
        }
    }
}

fn pending(app: &App) -> Result<()> {
    let entries = app.queue.snapshot()?;
    if app.json {
        let ops: Vec<_> = entries.iter().map(|e| &e.op).collect();
        return print_json(&ops);
    }
    if entries.is_empty() {
        println!("Nothing waiting to sync");
    }
    for entry in entries {
        println!(
            "#{} {} (queued {})",
            entry.seq,
            entry.op,
            entry.queued_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let dead = app.db.dead_letter_count()?;
    if dead > 0 {
        println!("{} unreadable entries set aside in dead_ops", dead);
    }
    Ok(())
}

fn describe(mission: &Mission) -> String {
    format!(
        "#{} {} [{}] -> {} on {}",
        mission.id, mission.name, mission.status, mission.destination, mission.launch_date
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
