use anyhow::{Context, Result};
use tracing::{error, info};

use migledger::config::{Command, Config};
use migledger::engine::{Engine, TracingObserver};
use migledger::migration::{load_set, Registry};

fn main() {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    if let Err(e) = run(&config) {
        error!("{} failed: {:#}", command_name(config.command), e);
        std::process::exit(1);
    }
}

fn command_name(command: Command) -> String {
    match command.mode() {
        Some(mode) => mode.to_string(),
        None => format!("{command:?}").to_lowercase(),
    }
}

fn run(config: &Config) -> Result<()> {
    // Loading fails before anything touches the database
    let set = load_set(&config.dir, &Registry::new())
        .with_context(|| format!("loading migrations from {}", config.dir))?;
    info!("Found {} migrations in {}", set.len(), config.dir);

    if config.command == Command::Fix {
        let renames = migledger::fix::fix(&set)?;
        if config.json {
            println!("{}", serde_json::to_string_pretty(&renames)?);
        } else if renames.is_empty() {
            println!("nothing to renumber");
        } else {
            for rename in &renames {
                println!("RENAMED {} => {}", rename.from.display(), rename.to.display());
            }
        }
        return Ok(());
    }

    let conn = rusqlite::Connection::open(&config.database)
        .with_context(|| format!("opening database {}", config.database))?;
    let mut engine = Engine::with_options(conn, config.engine_options())?;
    if let Some(deadline) = config.deadline_instant() {
        engine = engine.with_deadline(deadline);
    }

    match config.command.mode() {
        Some(mode) => {
            let report = engine.execute(mode, &set, &TracingObserver)?;
            if config.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
        }
        None if config.command == Command::Status => {
            let status = engine.status(&set)?;
            if config.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{status}");
            }
        }
        None => match engine.current_version()? {
            Some(version) => println!("version {version}"),
            None => println!("no migrations applied"),
        },
    }

    Ok(())
}
