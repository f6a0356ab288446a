//! Stampede orchestrator binary.
//!
//! Wires the durable command queue, the agent fleet plumbing and the
//! orchestration engine together and runs until ctrl-c. Domain entities
//! (runs, scenarios, agents) live in the in-memory repositories here;
//! production deployments replace them with the platform's store behind
//! the same interfaces.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use stampede_agent::{AgentClient, AgentHealthTracker, AgentSelector, ControlPlane};
use stampede_config::{ConfigLoader, LogFormat, LoggingConfig, StampedeConfig};
use stampede_engine::{
    CommandProvider, EngineSettings, LogAnnotationSink, ProcessorPool, StatisticsCollector,
};
use stampede_interfaces::{AgentRepository, CommandStore, RunRepository, ScenarioRepository};
use stampede_resilience::RetryPolicy;
use stampede_storage::{
    InMemoryAgentRepository, InMemoryRunRepository, InMemoryScenarioRepository, InMemoryStatsSink,
    SqliteCommandStore,
};

#[derive(Parser)]
#[command(name = "stampede", author, version, about = "Distributed load-test orchestrator")]
struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Command queue database URL
    #[arg(long, default_value = "sqlite://stampede-commands.db")]
    queue_url: String,

    /// Override the processor replica hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(cli.config.as_ref())
        .context("loading configuration")?;

    if cli.print_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    init_tracing(&config.logging)?;

    let hostname = resolve_hostname(&cli, &config);
    info!(hostname, "starting stampede orchestrator");

    let commands: Arc<dyn CommandStore> = Arc::new(
        SqliteCommandStore::connect(&cli.queue_url, config.engine.shared_host_pool)
            .await
            .context("opening command queue")?,
    );
    let runs = Arc::new(InMemoryRunRepository::new());
    let scenarios = Arc::new(InMemoryScenarioRepository::new());
    let agents = Arc::new(InMemoryAgentRepository::new());
    let stats_sink = Arc::new(InMemoryStatsSink::new());

    let control: Arc<dyn ControlPlane> =
        Arc::new(AgentClient::new(config.agent.call_timeout).context("building agent client")?);
    let selector = Arc::new(AgentSelector::new(
        Arc::clone(&agents) as Arc<dyn AgentRepository>,
        config.agent.default_tag.clone(),
    ));

    let settings = EngineSettings::from_config(&config.engine, &config.agent, hostname.clone());
    let dispatch_capacity = settings.dispatch_capacity;
    let pool = ProcessorPool::new(
        Arc::clone(&commands),
        Arc::clone(&runs) as Arc<dyn RunRepository>,
        Arc::clone(&scenarios) as Arc<dyn ScenarioRepository>,
        Arc::clone(&control),
        selector,
        Arc::new(LogAnnotationSink),
        settings,
    );

    let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_capacity);
    let mut workers = pool.spawn_workers(dispatch_rx);

    let provider = Arc::new(CommandProvider::new(
        Arc::clone(&commands),
        hostname.clone(),
        config.engine.poll_interval,
    ));
    let provider_task = tokio::spawn({
        let provider = Arc::clone(&provider);
        async move { provider.run(dispatch_tx).await }
    });

    let tracker = Arc::new(AgentHealthTracker::new(
        Arc::clone(&agents) as Arc<dyn AgentRepository>,
        Arc::clone(&control),
        config.agent.tracking_interval,
        RetryPolicy::linear(config.agent.retry_attempts, config.agent.retry_base_delay),
    ));
    let tracker_task = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.run().await }
    });

    let stats = Arc::new(StatisticsCollector::new(
        Arc::clone(&runs) as Arc<dyn RunRepository>,
        Arc::clone(&agents) as Arc<dyn AgentRepository>,
        Arc::clone(&control),
        stats_sink,
        config.agent.stats_interval,
    ));
    let stats_task = tokio::spawn({
        let stats = Arc::clone(&stats);
        async move { stats.run().await }
    });

    info!("stampede orchestrator up");
    tokio::signal::ctrl_c().await.context("awaiting ctrl-c")?;
    info!("shutting down");

    provider.stop();
    tracker.stop();
    stats.stop();

    // Stopping the provider drops the dispatch sender; workers drain the
    // channel and exit.
    provider_task.await?;
    while workers.join_next().await.is_some() {}
    tracker_task.abort();
    stats_task.abort();

    info!("bye");
    Ok(())
}

fn resolve_hostname(cli: &Cli, config: &StampedeConfig) -> String {
    if let Some(hostname) = &cli.hostname {
        return hostname.clone();
    }
    if !config.engine.hostname.is_empty() {
        return config.engine.hostname.clone();
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "stampede-0".to_string())
}

fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
        .context("parsing logging level")?;
    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}
