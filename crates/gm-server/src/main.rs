mod logging;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gm_agent::claude::ClaudeBackend;
use gm_core::config::{find_gm_project_template, load_gm_project_templates, load_team_templates, Config};
use gm_core::db::Db;
use gm_core::events::EventBus;
use gm_core::launcher::Launcher;
use gm_core::pipeline::Pipeline;
use gm_core::types::ProjectSpec;
use tokio::sync::broadcast;
use tracing::info;

/// The General Manager supervisor: every long-lived collaborator is
/// constructed once here and handed out by reference (spec §9,
/// "process-wide singletons -> explicit supervisor value"). No HTTP/WebSocket
/// listener is started — that facade is explicitly out of scope; `main`
/// drives the pipeline's operator operations directly, the same surface a
/// facade process would otherwise call into.
struct Supervisor {
    db: Arc<Db>,
    events: Arc<EventBus>,
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
}

impl Supervisor {
    fn bootstrap() -> Result<Self> {
        let config = Arc::new(Config::from_env().context("load configuration")?);
        std::fs::create_dir_all(&config.outputs_dir).context("create outputs dir")?;

        let mut db = Db::open(&config.db_path).context("open database")?;
        db.migrate().context("apply schema migrations")?;
        let db = Arc::new(db);

        let events = Arc::new(EventBus::new());

        // One backend handle is shared between the launcher (per-task
        // sessions) and the pipeline (one-shot conflict/build/test repair
        // agents) — both are just different invocations of the same
        // external CLI (spec §4.3 vs §4.4 step 3).
        let backend = Arc::new(ClaudeBackend::new(config.claude_bin.clone()));
        let launcher = Arc::new(Launcher::new(
            Arc::clone(&db),
            Arc::clone(&events),
            Arc::clone(&config),
            backend.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&db),
            Arc::clone(&events),
            Arc::clone(&config),
            launcher,
            backend,
        ));

        Ok(Self {
            db,
            events,
            config,
            pipeline,
        })
    }

    /// The concurrency model's lone heartbeat loop (spec §5 item (e)):
    /// subscriber hygiene itself is handled by `broadcast`'s drop-on-lag
    /// semantics, so this just gives an operator watching logs a sign of
    /// life while a project runs.
    fn spawn_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                tracing::debug!(
                    db_path = %this.config.db_path,
                    "heartbeat"
                );
            }
        });
    }
}

#[derive(Parser)]
#[command(name = "gm-server", about = "General Manager pipeline supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the `gm_projects` / `teams` templates declared in the config file.
    Templates,
    /// Launch a `gm_projects.<name>` template and block, logging progress
    /// events, until the project reaches a terminal phase.
    Launch {
        /// Name of the template under `gm_projects` in the config file.
        project: String,
    },
    /// Cancel a running project.
    Cancel {
        project_id: String,
    },
    /// Retry a failed project (re-attempts skipped merges, then re-runs the
    /// build/test gates).
    Retry {
        project_id: String,
    },
    /// Push a project's host repository branch to its remote.
    Push {
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let (log_tx, _log_rx) = broadcast::channel::<String>(1024);
    let log_ring: Arc<Mutex<VecDeque<String>>> =
        Arc::new(Mutex::new(VecDeque::with_capacity(500)));

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gm_server=info,gm_core=info,gm_agent=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logging::BroadcastLayer {
            tx: log_tx.clone(),
            ring: Arc::clone(&log_ring),
        })
        .init();

    let cli = Cli::parse();
    let supervisor = Arc::new(Supervisor::bootstrap()?);
    supervisor.spawn_heartbeat();

    match cli.command {
        Command::Templates => {
            for (name, template) in load_gm_project_templates(&supervisor.config.config_file) {
                println!("{name}: {}", template.description);
            }
            for (name, team) in load_team_templates(&supervisor.config.config_file) {
                println!("team {name}: {}", team.description);
            }
        }
        Command::Launch { project } => {
            let template =
                find_gm_project_template(&supervisor.config.config_file, &project)?;
            let spec: ProjectSpec = (project.as_str(), template).into();
            let project_id = supervisor.pipeline.launch_project(spec).await?;
            info!(project_id, "project launched");
            run_to_completion(&supervisor, &project_id).await?;
        }
        Command::Cancel { project_id } => {
            supervisor.pipeline.cancel(&project_id).await?;
        }
        Command::Retry { project_id } => {
            supervisor.pipeline.retry(&project_id).await?;
        }
        Command::Push { project_id } => {
            let output = supervisor.pipeline.push(&project_id).await?;
            println!("{output}");
        }
    }

    Ok(())
}

/// Poll the project row until it reaches a terminal phase, logging the
/// pipeline's own progress events as they arrive in the meantime.
async fn run_to_completion(supervisor: &Arc<Supervisor>, project_id: &str) -> Result<()> {
    let mut rx = supervisor.events.subscribe_gm();
    loop {
        tokio::select! {
            evt = rx.recv() => {
                match evt {
                    Ok(progress) if progress.project_id == project_id => {
                        info!(event = ?progress.event, "gm_progress");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        if let Some(project) = supervisor.db.get_project(project_id)? {
            if project.phase.is_terminal() {
                match &project.error_message {
                    Some(reason) => info!(phase = project.phase.as_str(), reason, "project reached terminal phase"),
                    None => info!(phase = project.phase.as_str(), "project reached terminal phase"),
                }
                break;
            }
        }
    }
    Ok(())
}
