use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use skilltree_offline::cache::{CacheStorage, NoopStorage, SqliteStorage};
use skilltree_offline::http::client::ReqwestNetwork;
use skilltree_offline::http::{Headers, HttpRequest, Method, Network};
use skilltree_offline::interceptor::{ControlMessage, InterceptorSettings, MessageOutcome};
use skilltree_offline::{
  logging, Config, FetchInterceptor, MutationQueue, NetworkMonitor, OfflineClient, SendOutcome,
  Store, SyncNotice, SyncOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "skilltree-offline")]
#[command(about = "Offline cache and write queue for the skill tree API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/skilltree-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the cache generation, partitions and queued writes
  Status,
  /// Fetch a path through the cache
  Get { path: String },
  /// Send a request, queueing it if the API is unreachable
  Send {
    method: Method,
    path: String,
    /// Request body
    #[arg(short, long)]
    body: Option<String>,
    /// Extra header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// List queued writes
  Queue {
    /// Drop every queued write
    #[arg(long)]
    clear: bool,
  },
  /// Replay queued writes now
  Sync,
  /// Activate a waiting cache generation
  Activate,
  /// Probe connectivity and replay queued writes whenever it returns
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let store = Arc::new(Store::open(&config.store_path()?)?);

  let result = if config.cache.enabled {
    let storage = Arc::new(SqliteStorage::new(store.clone()));
    run(args.command, &config, store.clone(), storage).await
  } else {
    run(args.command, &config, store.clone(), Arc::new(NoopStorage)).await
  };

  store.dispose()?;
  result
}

async fn run<S: CacheStorage + 'static>(
  command: Command,
  config: &Config,
  store: Arc<Store>,
  storage: Arc<S>,
) -> Result<()> {
  let base_url = config.base_url()?;
  let network = Arc::new(ReqwestNetwork::new(
    base_url.clone(),
    config.network.timeout(),
  )?);

  let interceptor = Arc::new(FetchInterceptor::new(
    storage,
    network.clone(),
    InterceptorSettings::from_config(config)?,
  ));
  if let Err(e) = interceptor.start().await {
    warn!("cache setup failed, requests bypass the cache: {}", e);
    eprintln!("Warning: cache setup failed: {}", e);
  }

  let probe_url = base_url
    .join(&config.network.probe_path)
    .map_err(|e| eyre!("Invalid probe path '{}': {}", config.network.probe_path, e))?;

  let queue = Arc::new(MutationQueue::new(store, config.queue.clone()));
  let client = OfflineClient::new(interceptor.clone(), queue.clone());

  match command {
    Command::Status => {
      let online = network.fetch(&HttpRequest::get(probe_url)).await.is_ok();
      println!(
        "API:              {} ({})",
        base_url,
        if online { "online" } else { "offline" }
      );
      println!("Cache generation: {}", config.cache.version);
      println!("Worker state:     {}", interceptor.state().as_str());
      match interceptor.storage().active_generation()? {
        Some(active) => println!("Active generation: {}", active),
        None => println!("Active generation: none"),
      }
      for partition in interceptor.storage().partitions()? {
        println!("  {:<16} {} entries", partition.name, partition.entries);
      }
      println!("Queued writes:    {}", queue.size()?);
    }

    Command::Get { path } => {
      let result = client.get(&path).await?;
      match result.cached_at {
        Some(at) => eprintln!(
          "{} ({:?}, cached {})",
          result.response.status,
          result.source,
          at.to_rfc3339()
        ),
        None => eprintln!("{} ({:?})", result.response.status, result.source),
      }
      println!("{}", result.response.text());
    }

    Command::Send {
      method,
      path,
      body,
      headers,
    } => {
      let headers = parse_headers(&headers)?;
      match client.send(method, &path, body, headers).await? {
        SendOutcome::Sent(response) => {
          eprintln!("{}", response.status);
          println!("{}", response.text());
        }
        SendOutcome::Queued(id) => {
          println!("Offline: queued {} {} as {}", method, path, id);
        }
      }
    }

    Command::Queue { clear } => {
      if clear {
        queue.clear()?;
        println!("Queue cleared");
        return Ok(());
      }

      let pending = queue.pending()?;
      if pending.is_empty() {
        println!("No queued writes");
      }
      for request in pending {
        println!(
          "{}  {:<6} {}  retries={}  queued {}",
          request.id,
          request.method,
          request.endpoint,
          request.retry_count,
          request.enqueued_at.to_rfc3339()
        );
      }
    }

    Command::Sync => {
      let orchestrator = SyncOrchestrator::new(queue, network, base_url);
      let result = orchestrator.sync_offline_queue().await;
      println!("{}", SyncNotice::Synced(result));
    }

    Command::Activate => match interceptor.handle_message(ControlMessage::SkipWaiting)? {
      MessageOutcome::Activated { deleted } if deleted.is_empty() => {
        println!("Activated {}", config.cache.version);
      }
      MessageOutcome::Activated { deleted } => {
        println!(
          "Activated {}, deleted {}",
          config.cache.version,
          deleted.join(", ")
        );
      }
      MessageOutcome::NotWaiting => {
        println!(
          "Nothing to activate (worker is {})",
          interceptor.state().as_str()
        );
      }
      other => return Err(eyre!("Unexpected outcome: {:?}", other)),
    },

    Command::Watch => {
      let monitor = Arc::new(NetworkMonitor::new(true));

      let orchestrator = Arc::new(SyncOrchestrator::new(queue, network.clone(), base_url));
      let (tx, mut notices) = mpsc::unbounded_channel();
      let runner = tokio::spawn(orchestrator.clone().run(monitor.subscribe(), tx));
      let probe = monitor.spawn_probe(network, probe_url, config.network.probe_interval());

      // Writes queued by an earlier run
      let initial = orchestrator.sync_offline_queue().await;
      if initial.succeeded + initial.failed > 0 {
        println!("{}", SyncNotice::Synced(initial));
      }

      info!("watching connectivity");
      println!("Watching connectivity, press Ctrl-C to stop");
      loop {
        tokio::select! {
          notice = notices.recv() => match notice {
            Some(notice) => println!("{}", notice),
            None => break,
          },
          _ = tokio::signal::ctrl_c() => break,
        }
      }

      probe.abort();
      runner.abort();
    }
  }

  Ok(())
}

/// Parse NAME:VALUE pairs.
fn parse_headers(raw: &[String]) -> Result<Headers> {
  raw
    .iter()
    .map(|h| {
      let (name, value) = h
        .split_once(':')
        .ok_or_else(|| eyre!("Invalid header '{}', expected NAME:VALUE", h))?;
      Ok((name.trim().to_string(), value.trim().to_string()))
    })
    .collect()
}
