use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_storage::{MetricsStore, PgMetricsStore};
use pulse_sync::{
    CollectionScheduler, CycleSummary, MetricsCollector, PulseConfig, SourceOutcome, UnitReport,
};
use pulse_web::AppState;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "code-pulse")]
#[command(about = "Collects CI, code quality, and ticket metrics into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and the read API (default).
    Serve,
    /// Run one collection cycle across every configured source.
    Collect,
    /// Collect runs of a single workflow.
    CollectWorkflow {
        owner: String,
        repo: String,
        workflow: String,
    },
    /// Collect measures of a single quality project.
    CollectQuality { project_key: String },
    /// Collect tickets matching a single tracker query.
    CollectTickets { query: String },
    /// Apply schema migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PulseConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Collect => {
            let collector = collector(&config).await?;
            let summary = collector.run_cycle().await;
            print_summary(&summary);
        }
        Commands::CollectWorkflow {
            owner,
            repo,
            workflow,
        } => {
            let report = collector(&config)
                .await?
                .collect_workflow(&owner, &repo, &workflow)
                .await?;
            print_report(&format!("{owner}/{repo} {workflow}"), &report);
        }
        Commands::CollectQuality { project_key } => {
            let report = collector(&config)
                .await?
                .collect_quality(&project_key)
                .await?;
            print_report(&project_key, &report);
        }
        Commands::CollectTickets { query } => {
            let report = collector(&config).await?.collect_tickets(&query).await?;
            print_report(&query, &report);
        }
        Commands::Migrate => {
            open_store(&config).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

/// Connects and migrates. Either failing is fatal.
async fn open_store(config: &PulseConfig) -> Result<Arc<PgMetricsStore>> {
    let store = PgMetricsStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(Arc::new(store))
}

async fn collector(config: &PulseConfig) -> Result<MetricsCollector> {
    let store: Arc<dyn MetricsStore> = open_store(config).await?;
    MetricsCollector::from_config(config, store).context("building collector")
}

async fn serve(config: PulseConfig) -> Result<()> {
    let store: Arc<dyn MetricsStore> = open_store(&config).await?;
    let collector = MetricsCollector::from_config(&config, Arc::clone(&store))
        .context("building collector")?;

    let scheduler = CollectionScheduler::new(config.collection_schedule.clone(), Arc::new(collector));
    let state = scheduler.start().await.context("starting scheduler")?;
    info!(?state, port = config.port, "code-pulse started");

    pulse_web::serve(config.port, AppState::new(store), shutdown_signal()).await?;

    if let Err(err) = scheduler.stop().await {
        warn!(error = %err, "scheduler did not stop cleanly");
    }
    info!("code-pulse stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "listening for ctrl-c failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "listening for SIGTERM failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn print_report(label: &str, report: &UnitReport) {
    println!(
        "{label}: fetched={} inserted={} ignored={} updated={}",
        report.fetched, report.inserted, report.ignored, report.updated
    );
}

fn print_summary(summary: &CycleSummary) {
    println!(
        "cycle {} complete: records_touched={} errors={}",
        summary.cycle_id,
        summary.records_touched(),
        summary.error_count()
    );
    for source in &summary.sources {
        match &source.outcome {
            SourceOutcome::Skipped { reason } => println!("  {}: skipped ({reason})", source.source),
            SourceOutcome::Collected { units } => {
                for unit in units {
                    match &unit.result {
                        Ok(report) => print_report(&format!("  {} {}", source.source, unit.unit), report),
                        Err(err) => println!("  {} {}: failed: {err}", source.source, unit.unit),
                    }
                }
            }
        }
    }
}
