mod cli;
mod config;
mod database;
mod monitoring;
mod notifications;
mod pool;
mod registry;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use cli::{Cli, Command, TargetCommand};
use config::Config;
use database::DatabaseImpl;
use monitoring::scheduler::shutdown_signal;
use monitoring::{MonitoringExecutor, MonitoringScheduler};
use notifications::{LogSink, NotificationSink, SmtpSink, TransitionNotifier};
use registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref()).context("loading configuration")?;
    config.apply_env()?;
    config.validate()?;

    logger::init(&config.worker.log_level);

    match cli.command {
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Run => {
            let shutdown = shutdown_signal().context("installing the interrupt handler")?;
            let scheduler = build_scheduler(&config).await?;
            scheduler.run(shutdown).await;
            Ok(())
        }
        Command::Sweep => {
            let scheduler = build_scheduler(&config).await?;
            print_json(&scheduler.run_sweep().await)
        }
        Command::Targets(command) => {
            let registry = open_registry(&config).await?;
            match command {
                TargetCommand::Add { name, address, protocol } => {
                    print_json(&registry.create_target(&name, &address, protocol).await?)
                }
                TargetCommand::List => print_json(&registry.list_targets().await?),
                TargetCommand::Show { id } => print_json(&registry.get_target(id).await?),
                TargetCommand::Update(args) => {
                    let id = args.id;
                    print_json(&registry.update_target(id, args.into()).await?)
                }
                TargetCommand::Remove { id } => {
                    registry.delete_target(id).await?;
                    info!(target_id = id, "target removed");
                    Ok(())
                }
            }
        }
        Command::History { id, limit } => {
            let registry = open_registry(&config).await?;
            print_json(&registry.history(id, limit).await?)
        }
        Command::WasHealthy { id, at } => {
            let registry = open_registry(&config).await?;
            print_json(&registry.was_healthy(id, at).await?)
        }
    }
}

async fn open_database(config: &Config) -> Result<Arc<DatabaseImpl>> {
    let database = database::open(&config.database.path)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;
    Ok(Arc::new(database))
}

async fn open_registry(config: &Config) -> Result<Registry> {
    Ok(Registry::new(open_database(config).await?))
}

async fn build_scheduler(config: &Config) -> Result<MonitoringScheduler> {
    let database = open_database(config).await?;
    let executor = Arc::new(MonitoringExecutor::new(config.worker.timeout())?);
    let notifier = Arc::new(build_notifier(config)?);

    info!(
        database = %config.database.path,
        timeout_secs = config.worker.timeout_seconds,
        "monitoring worker ready"
    );

    Ok(MonitoringScheduler::new(database, executor, notifier, config.worker.interval())
        .with_max_concurrency(config.worker.max_concurrency))
}

fn build_notifier(config: &Config) -> Result<TransitionNotifier> {
    let recipient = config.alerts.recipient.clone().filter(|r| !r.is_empty());

    let sink: Arc<dyn NotificationSink> = match &recipient {
        Some(_) if config.smtp.is_configured() => Arc::new(SmtpSink::new(&config.smtp)?),
        _ => {
            warn!("missing email configuration, alerts will only be logged");
            Arc::new(LogSink)
        }
    };

    Ok(TransitionNotifier::new(sink, recipient.unwrap_or_default()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
