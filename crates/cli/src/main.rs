//! teamprog CLI - inspect and edit team progress.

mod objectives;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use teamprog_core::{MemberId, ObjectiveKey, ProgressRecord, Requester};
use teamprog_progress::{CacheFreeingOption, EngineConfig, ProgressEngine, TracingObserver};
use teamprog_storage::{Backend, JsonBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teamprog")]
#[command(about = "Team progress tracking", long_about = None)]
struct Cli {
    /// Data directory of the JSON backend
    #[arg(long, default_value = ".teamprog")]
    data: PathBuf,

    /// SQLite database URL; replaces the JSON backend
    #[cfg(feature = "sqlite")]
    #[arg(long)]
    database: Option<String>,

    /// Engine config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Objective definitions (JSON); defaults to <data>/objectives.json
    #[arg(long)]
    objectives: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new member in a team of its own
    Register {
        /// Display name
        name: String,
    },
    /// Show a member's team
    Show {
        /// Member ID
        member: MemberId,
    },
    /// Rename a member
    Rename {
        /// Member ID
        member: MemberId,
        /// New display name
        name: String,
    },
    /// Set progress of an objective
    Set {
        /// Member ID
        member: MemberId,
        /// Objective key (namespace:key)
        objective: ObjectiveKey,
        /// New value
        value: u32,
        /// Do not hand out rewards on completion
        #[arg(long)]
        no_rewards: bool,
    },
    /// Complete an objective
    Grant {
        /// Member ID
        member: MemberId,
        /// Objective key (namespace:key)
        objective: ObjectiveKey,
    },
    /// Reset an objective
    Revoke {
        /// Member ID
        member: MemberId,
        /// Objective key (namespace:key)
        objective: ObjectiveKey,
    },
    /// Move a member into another member's team
    Join {
        /// Member to move
        member: MemberId,
        /// Any member of the target team
        target: MemberId,
    },
    /// Move a member into a new team of its own
    Leave {
        /// Member ID
        member: MemberId,
    },
    /// Delete teams without members
    Gc,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let objectives_path = cli.objectives.clone().unwrap_or_else(|| cli.data.join("objectives.json"));
    let registry = objectives::load(&objectives_path)?;
    let backend = open_backend(&cli).await?;

    let engine = ProgressEngine::start(backend, registry, config).await?;
    engine.subscribe(Arc::new(TracingObserver));

    let result = run(&engine, cli.command).await;
    engine.shutdown().await?;
    result
}

async fn open_backend(cli: &Cli) -> Result<Arc<dyn Backend>> {
    #[cfg(feature = "sqlite")]
    if let Some(url) = &cli.database {
        let backend = teamprog_storage::SqliteBackend::new(url)
            .await
            .with_context(|| format!("opening {}", url))?;
        return Ok(Arc::new(backend));
    }

    let backend = JsonBackend::new(&cli.data)
        .await
        .with_context(|| format!("opening {}", cli.data.display()))?;
    Ok(Arc::new(backend))
}

async fn run(engine: &ProgressEngine, command: Commands) -> Result<()> {
    let cli = Requester::new("cli");

    match command {
        Commands::Register { name } => {
            let member = MemberId::new();
            let team = engine.load_online(member, &name).await?;
            engine.set_offline(member);
            println!("Registered {} ({}) in {}", name, member, team.team_id());
        }
        Commands::Show { member } => {
            let team = pin(engine, member, &cli).await?;
            print_team(engine, &team)?;
        }
        Commands::Rename { member, name } => {
            engine.rename_member(member, &name).await?;
            println!("Renamed {} to {}", member, name);
        }
        Commands::Set { member, objective, value, no_rewards } => {
            let team = pin(engine, member, &cli).await?;
            let old = engine.set_progress(&objective, &team, value, !no_rewards)?;
            println!("{}: {} -> {}", objective, old, value);
        }
        Commands::Grant { member, objective } => {
            let team = pin(engine, member, &cli).await?;
            engine.grant(&objective, &team, true)?;
            println!("{}: granted", objective);
        }
        Commands::Revoke { member, objective } => {
            let team = pin(engine, member, &cli).await?;
            let old = engine.revoke(&objective, &team)?;
            println!("{}: {} -> 0", objective, old);
        }
        Commands::Join { member, target } => {
            pin(engine, member, &cli).await?;
            let team = pin(engine, target, &cli).await?;
            engine.move_member(member, &team).await?;
            println!("{} joined {}", member, team.team_id());
        }
        Commands::Leave { member } => {
            pin(engine, member, &cli).await?;
            let team = engine.move_member_to_new_team(member).await?;
            println!("{} now in {}", member, team.team_id());
        }
        Commands::Gc => {
            let removed = engine.collect_orphan_teams().await?;
            info!(removed, "garbage collection done");
            println!("Removed {} empty teams", removed);
        }
    }

    engine.flush().await;
    if engine.write_failures() > 0 {
        anyhow::bail!("{} writes failed", engine.write_failures());
    }
    Ok(())
}

async fn pin(engine: &ProgressEngine, member: MemberId, requester: &Requester) -> Result<Arc<ProgressRecord>> {
    engine
        .load_member(member, requester, CacheFreeingOption::Manual)
        .await
        .with_context(|| format!("loading member {}", member))
}

fn print_team(engine: &ProgressEngine, team: &Arc<ProgressRecord>) -> Result<()> {
    println!("Team: {}", team.team_id());
    println!("  Members:");
    for member in team.members()? {
        println!("    {}", member);
    }
    println!("  Progress:");
    for objective in engine.registry().iter() {
        let value = engine.progress(team, &objective.key)?;
        if value > 0 {
            let done = if value >= objective.max { " (done)" } else { "" };
            println!("    {} [{}] {}/{}{}", objective.key, objective.display, value, objective.max, done);
        }
    }
    Ok(())
}
