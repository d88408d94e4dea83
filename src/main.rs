use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use chorus::config::EngineConfig;
use chorus::coordination::{Janitor, JanitorReport};
use chorus::id::now_ms;
use chorus::presence::PresenceStore;
use chorus::store::CoordinationStore;
use cli::Cli;
use cli::commands::Commands;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorus")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("chorus.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &EngineConfig) -> Result<Arc<CoordinationStore>> {
    let path = config.db_path();
    let store = CoordinationStore::open(&path).context(format!("Failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run_application(cli: &Cli, config: &EngineConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Janitor { watch } => handle_janitor_command(*watch, config).await,
        Commands::Config => handle_config_command(config),
        Commands::Presence { channel } => handle_presence_command(channel, config),
    }
}

fn print_report(report: &JanitorReport) {
    if report.total() == 0 {
        println!("{}", "Nothing to purge".green());
        return;
    }
    println!("{} {} rows", "Purged".green(), report.total());
    let rows = [
        ("locks", report.locks),
        ("leases", report.leases),
        ("threads", report.threads),
        ("responders", report.responders),
        ("affinities", report.affinities),
        ("avatar messages", report.avatar_messages),
        ("sessions", report.sessions),
        ("human activity", report.human_activity),
    ];
    for (name, count) in rows.iter().filter(|(_, count)| *count > 0) {
        println!("  {:<16} {}", name.cyan(), count);
    }
}

async fn handle_janitor_command(watch: bool, config: &EngineConfig) -> Result<()> {
    let store = open_store(config)?;
    let janitor = Arc::new(Janitor::new(store, config));

    let report = janitor.run_once(now_ms()).context("Janitor pass failed")?;
    print_report(&report);
    if !watch {
        return Ok(());
    }

    println!(
        "{} every {}ms (ctrl-c to stop)",
        "Watching".cyan(),
        config.janitor.interval_ms
    );
    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = {
        let janitor = janitor.clone();
        tokio::spawn(async move { janitor.run(rx).await })
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    let _ = tx.send(true);
    task.await.context("Janitor task failed")?;
    println!("{}", "Stopped".yellow());
    Ok(())
}

fn handle_config_command(config: &EngineConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    println!("{} {}", "Database:".green(), config.db_path().display());
    println!("{}", yaml);
    Ok(())
}

fn handle_presence_command(channel: &str, config: &EngineConfig) -> Result<()> {
    let presence = PresenceStore::new(open_store(config)?);
    let records = presence
        .list_for_channel(channel)
        .context(format!("Failed to list presence for {}", channel))?;

    if records.is_empty() {
        println!("{} {}", "No presence records for".yellow(), channel);
        return Ok(());
    }

    let now = now_ms();
    for record in records {
        let last_turn = record
            .last_turn_at
            .map(|at| format!("{}s ago", (now - at) / 1000))
            .unwrap_or_else(|| "never".to_string());
        let cooldown = match record.cooldown_until {
            Some(until) if until > now => format!(" cooldown {}s", (until - now) / 1000).red().to_string(),
            _ => String::new(),
        };
        println!(
            "{:<20} {:<8} turns={:<4} last={}{}{}",
            record.avatar_id.cyan(),
            record.state.as_str(),
            record.turns_taken,
            last_turn,
            if record.has_summon_credit() {
                format!(" summon={}", record.new_summon_turns_remaining).magenta().to_string()
            } else {
                String::new()
            },
            cooldown,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (file, then environment overrides)
    let mut config = EngineConfig::resolve(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    }

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
