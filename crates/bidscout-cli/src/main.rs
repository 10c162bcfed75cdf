//! bidscout service entry point.

mod health;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bidscout_core::model::SearchResult;
use bidscout_llm::LlmClient;
use bidscout_net::{PdfDownloader, Validator};
use bidscout_research::ResearchAgent;
use bidscout_storage::{FsObjectStore, ObjectStore, Store};
use bidscout_sync::{AppConfig, Scheduler, SchedulerConfig};

#[derive(Debug, Parser)]
#[command(name = "bidscout")]
#[command(about = "Autonomous RFP discovery pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the discovery scheduler until shut down.
    Run {
        /// HTTP port for health checks.
        #[arg(long, default_value_t = 8081)]
        port: u16,
    },
    /// Execute a single discovery cycle and exit.
    RunOnce,
    /// Research one URL without searching, printing the step log.
    Research { url: String },
    /// Flip the most recent failed results back to pending.
    RetryFailed {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);

    match cli.command.unwrap_or(Commands::Run { port: 8081 }) {
        Commands::Run { port } => run_daemon(config, port).await,
        Commands::RunOnce => run_once(config).await,
        Commands::Research { url } => research_url(config, &url).await,
        Commands::RetryFailed { limit } => retry_failed(config, limit).await,
    }
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Pipeline {
    store: Arc<Store>,
    scheduler: Scheduler,
}

async fn build_pipeline(config: &AppConfig, scheduler_config: SchedulerConfig) -> Result<Pipeline> {
    let store = Arc::new(Store::connect(&config.database_url).await?);
    info!("connected to database");

    let llm = Arc::new(LlmClient::new(config.llm_api_key.clone()));
    let validator = Arc::new(Validator::new()?);
    let agent = Arc::new(ResearchAgent::new(llm.clone())?);
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
        config.object_store_account.as_str(),
        &config.object_store_bucket,
    ));
    let pdfs = Arc::new(PdfDownloader::new(objects)?);

    let scheduler = Scheduler::new(
        store.clone(),
        llm,
        validator,
        agent,
        pdfs,
        scheduler_config,
    );
    Ok(Pipeline { store, scheduler })
}

async fn run_daemon(config: AppConfig, port: u16) -> Result<()> {
    let pipeline = build_pipeline(&config, SchedulerConfig::default()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(health::serve(
        pipeline.store.clone(),
        port,
        shutdown.clone(),
    ));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("received shutdown signal");
        signal_token.cancel();
    });

    pipeline.scheduler.run(shutdown).await;
    info!("discovery service stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run_once(config: AppConfig) -> Result<()> {
    let pipeline =
        build_pipeline(&config, SchedulerConfig::default().with_run_on_start(false)).await?;

    info!("running single discovery cycle");
    let stats = pipeline.scheduler.run_once(&CancellationToken::new()).await?;
    println!(
        "cycle complete: queries={} failed={} found={} new={} skipped={} validated={} \
         researched={} promoted={} duplicates={} pdfs={}",
        stats.queries_executed,
        stats.queries_failed,
        stats.results_found,
        stats.results_new,
        stats.results_skipped,
        stats.validated,
        stats.researched,
        stats.rfps_promoted,
        stats.duplicates_linked,
        stats.pdfs_stored,
    );
    Ok(())
}

async fn research_url(config: AppConfig, url: &str) -> Result<()> {
    let llm = Arc::new(LlmClient::new(config.llm_api_key.clone()));
    let agent = ResearchAgent::new(llm)?;

    let result = SearchResult::synthetic(url);
    let report = agent.research(&CancellationToken::new(), &result).await;

    println!(
        "research {}: status={} steps={} tokens={}",
        url,
        report.status.as_str(),
        report.steps_taken,
        report.total_tokens
    );
    for step in &report.steps {
        println!(
            "  {}. {} [{}] {}",
            step.step_number,
            step.action.as_str(),
            if step.success { "ok" } else { "failed" },
            step.reasoning
        );
    }
    if let Some(details) = &report.extracted {
        println!(
            "extracted: title={:?} agency={:?} state={:?} due={:?}",
            details.title, details.agency, details.state, details.due_date
        );
    }
    if !report.found_pdfs.is_empty() {
        println!("pdfs: {}", report.found_pdfs.join(", "));
    }
    if report.cancelled {
        warn!("research was cancelled before completion");
    }
    Ok(())
}

async fn retry_failed(config: AppConfig, limit: i64) -> Result<()> {
    let store = Store::connect(&config.database_url).await?;
    let reset = store.reset_failed_research(limit).await?;
    println!("reset {reset} failed results to pending");
    Ok(())
}
