//! relay CLI: runs the queue workers and the dispatch loop.

use clap::{Parser, Subcommand};
use queue_relay::config::{Config, ProfileRegistry};
use queue_relay::db::Db;
use queue_relay::dispatch::{BatchOutcome, DispatchConfig, DispatchEngine};
use queue_relay::queue::{PgmqQueue, ReceiveOptions};
use queue_relay::remote::{API_COMPONENT, DispatcherClient, MessagingClient, RemoteCall, http_client};
use queue_relay::sink::{EventLog, FileSink, LogSink};
use queue_relay::telemetry::{TelemetryConfig, init_telemetry};
use queue_relay::worker::QueueWorker;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relay", about = "Queue relay workers and dispatch loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every queue worker and the dispatch loop until Ctrl-C
    Serve {
        /// Directory containing worker profile TOML files
        #[arg(long, default_value = "profiles")]
        profiles: PathBuf,
        /// Run the queue workers only
        #[arg(long)]
        no_dispatch: bool,
    },
    /// Run a single dispatch cycle and print its report
    Cycle,
    /// Enqueue a JSON message (development producer)
    Send {
        /// Queue name
        queue: String,
        /// JSON payload
        payload: String,
    },
}

/// Handles built once at startup and shared by every task.
struct Clients {
    log: EventLog,
    dispatcher: Arc<dyn RemoteCall>,
    messaging: Arc<dyn RemoteCall>,
}

impl Clients {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let sink: Arc<dyn LogSink> = Arc::new(FileSink::open(&config.log_file)?);
        let log = EventLog::new("relay", sink);
        let api_log = log.for_component(API_COMPONENT);
        let http = http_client(config.http_timeout)?;
        Ok(Self {
            dispatcher: Arc::new(DispatcherClient::new(
                http.clone(),
                &config.dispatcher_url,
                api_log.clone(),
            )),
            messaging: Arc::new(MessagingClient::new(http, &config.messaging, api_log)),
            log,
        })
    }

    fn dispatch_engine(&self, config: &Config) -> DispatchEngine {
        DispatchEngine::new(
            Arc::clone(&self.dispatcher),
            DispatchConfig::new(config.entities.clone(), config.dispatch_interval),
            self.log.for_component("dispatch"),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "queue-relay".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Serve {
            profiles,
            no_dispatch,
        } => cmd_serve(&config, profiles, no_dispatch).await,
        Command::Cycle => cmd_cycle(&config).await,
        Command::Send { queue, payload } => cmd_send(&config, queue, payload).await,
    }
}

async fn cmd_serve(config: &Config, profiles: PathBuf, no_dispatch: bool) -> anyhow::Result<()> {
    let registry = ProfileRegistry::load_from_dir(&profiles)?;
    let clients = Clients::build(config)?;
    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.health_check().await?;

    let options = ReceiveOptions {
        wait: config.queue_wait,
        visibility_timeout: config.visibility_timeout,
    };
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for profile in registry.iter() {
        db.create_queue(&profile.queue).await?;
        let queue = Arc::new(PgmqQueue::new(Arc::clone(&db), profile.queue.clone()));
        let worker = QueueWorker::new(
            profile.clone(),
            queue,
            Arc::clone(&clients.messaging),
            options,
            &clients.log,
        )
        .with_dispatcher(Arc::clone(&clients.dispatcher));
        let token = shutdown.clone();
        tasks.spawn(async move { worker.run(token).await });
    }

    if !no_dispatch {
        let engine = clients.dispatch_engine(config);
        let token = shutdown.clone();
        tasks.spawn(async move { engine.run(token).await });
    }

    clients.log.info(format!(
        "started {} queue worker(s){}",
        registry.len(),
        if no_dispatch { "" } else { " and the dispatch loop" }
    ));

    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        token.cancel();
    });

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "task ended abnormally");
        }
    }
    clients.log.info("all tasks stopped");
    Ok(())
}

async fn cmd_cycle(config: &Config) -> anyhow::Result<()> {
    let clients = Clients::build(config)?;
    let report = clients.dispatch_engine(config).run_cycle().await;

    println!(
        "{:<12}  {:<7}  {:<9}  {:<7}  {:<6}  {:<10}",
        "ENTITY", "FETCHED", "SUB-ITEMS", "UPDATED", "FAILED", "FOLLOW-UPS"
    );
    println!("{}", "-".repeat(62));
    for entity in &report.entities {
        println!(
            "{:<12}  {:<7}  {:<9}  {:<7}  {:<6}  {:<10}",
            entity.entity,
            if entity.fetched { "yes" } else { "no" },
            entity.sub_items,
            entity.updated,
            entity.update_failures + entity.sub_item_failures,
            entity.follow_ups,
        );
    }

    let batch = match report.batch {
        BatchOutcome::FetchFailed => "fetch failed".to_string(),
        BatchOutcome::Empty => "nothing pending".to_string(),
        BatchOutcome::Submitted(n) => format!("{n} submitted"),
        BatchOutcome::SubmitFailed(n) => format!("{n} failed to submit"),
    };
    println!("\nBatch:  {batch}");
    println!("Cycle:  {}", report.cycle_id);
    Ok(())
}

async fn cmd_send(config: &Config, queue: String, payload: String) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload)?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.create_queue(&queue).await?;
    let msg_id = db.send_to_queue(&queue, &payload).await?;
    println!("Sent: message {msg_id} to queue {queue}");
    Ok(())
}
