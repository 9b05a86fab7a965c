use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use studysync::api::ApiClient;
use studysync::config::Config;
use studysync::event::{EventBus, SyncMessage};
use studysync::gateway::CachingGateway;
use studysync::store::{LocalStore, OperationKind, SqliteStore};
use studysync::sync::{
  connectivity_channel, BackgroundTrigger, OfflineFirstClient, SubmitOutcome, SyncEngine,
  SyncOptions,
};

/// How often the watch daemon probes the backend for reachability.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "studysync")]
#[command(about = "Offline-first sync core for the study-tools app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/studysync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run one full sync pass: replay the queue, refresh the mirror
  Sync,
  /// Show pending operations and the mirrored entity count
  Status,
  /// Watch connectivity and replay the queue whenever it returns
  Watch,
  /// Submit a mutation, queueing it locally when the network is down
  Submit {
    #[arg(value_enum)]
    verb: Verb,
    /// Target resource, e.g. /api/tasks or /api/tasks/<id>
    target_url: String,
    /// JSON body (required for create and update)
    #[arg(long)]
    body: Option<String>,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Verb {
  Create,
  Update,
  Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let store = match &config.sync.store_path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  };
  let store = Arc::new(store);

  let api = ApiClient::new(&config.server.base_url, Config::get_auth_token())?;
  let bus = EventBus::new();
  let options = SyncOptions {
    tasks_path: config.server.tasks_path.clone(),
    max_retries: config.sync.max_retries,
    refresh_timeout: config.sync.refresh_timeout(),
    replay_timeout: config.sync.replay_timeout(),
    queue_soft_cap: config.sync.queue_soft_cap,
  };
  let engine = Arc::new(SyncEngine::new(Arc::clone(&store), api.clone(), bus.clone(), options));

  match args.command {
    Command::Sync => {
      match engine.run_full_sync().await? {
        Some(stats) => println!(
          "replayed {} operation(s), dropped {}, {} still pending; {} entities mirrored",
          stats.replayed,
          stats.dropped,
          stats.remaining,
          store.get_all()?.len()
        ),
        None => println!("a sync pass was already running"),
      }
    }
    Command::Status => {
      let pending = store.list_pending()?;
      println!("{} entities mirrored", store.get_all()?.len());
      println!("{} operation(s) pending:", pending.len());
      for op in pending {
        println!(
          "  #{} {} {} (retries: {}, enqueued {})",
          op.sync_id,
          op.kind.verb(),
          op.target_url,
          op.retry_count,
          op.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
    Command::Submit { verb, target_url, body } => {
      let body = body
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| eyre!("invalid JSON body: {e}"))?;

      let kind = match (verb, body) {
        (Verb::Create, Some(body)) => OperationKind::Create(body),
        (Verb::Update, Some(body)) => OperationKind::Update(body),
        (Verb::Delete, None) => OperationKind::Delete,
        (Verb::Delete, Some(_)) => return Err(eyre!("delete takes no body")),
        _ => return Err(eyre!("create and update require --body")),
      };

      // Capture the auth token now: the queue may drain later, without
      // this session's environment.
      let mut headers = std::collections::BTreeMap::new();
      if let Some(token) = Config::get_auth_token() {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
      }

      let client = OfflineFirstClient::new(api.clone(), Arc::clone(&store));
      match client.submit(&target_url, kind, headers).await? {
        SubmitOutcome::Applied => println!("applied"),
        SubmitOutcome::Queued => println!("saved locally, will sync"),
      }
    }
    Command::Watch => {
      // Install/activate the caching gateway: seed the app shell, retire
      // cache partitions left behind by previous versions.
      let mut gateway = CachingGateway::new(Arc::clone(&store), config.server.tasks_path.clone());
      if let Some(page) = &config.cache.offline_page {
        gateway = gateway.with_offline_page(page.clone());
      }
      if !config.cache.precache.is_empty() {
        let base = url::Url::parse(&config.server.base_url)?;
        let shell: Vec<String> = config
          .cache
          .precache
          .iter()
          .filter_map(|p| base.join(p).ok().map(String::from))
          .collect();
        gateway.install(&shell).await;
      }
      gateway.activate()?;

      let trigger = Arc::new(BackgroundTrigger::register(Arc::clone(&engine), bus.clone()));
      let online = api.probe().await;
      let (tx, connectivity) = connectivity_channel(online);
      let watcher = trigger.watch(connectivity);

      // Startup policy: with the network reachable, run one proactive pass.
      if online {
        if let Err(err) = engine.run_full_sync().await {
          tracing::warn!("startup sync failed: {err}");
        }
      }

      let mut messages = bus.subscribe();
      info!(online, "watching connectivity (ctrl-c to stop)");
      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          msg = messages.recv() => {
            match msg {
              Ok(SyncMessage::RunSync) => {
                if let Err(err) = engine.run_full_sync().await {
                  tracing::warn!("sync pass failed: {err}");
                }
              }
              Ok(SyncMessage::SyncCompleted) => info!("sync pass completed"),
              // A replacement daemon wants the store: hand over.
              Ok(SyncMessage::SkipWaiting) => break,
              Err(_) => {}
            }
          }
          _ = tokio::time::sleep(PROBE_INTERVAL) => {
            let online = api.probe().await;
            if online != *tx.borrow() {
              let _ = tx.send(online);
            }
          }
        }
      }
      watcher.abort();
    }
  }

  Ok(())
}
