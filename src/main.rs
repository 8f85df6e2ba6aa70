mod cache;
mod config;
mod connectivity;
mod event;
mod net;
mod queue;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

use cache::{Destination, ResourceRequest, SqliteCacheStore};
use event::{Signal, SignalSource};
use net::{HttpClient, HttpDelivery};
use queue::SqliteQueueStore;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "cachette")]
#[command(about = "Offline-first cache and event sync worker for static sites")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachette/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Cache the static asset manifest (fails if any asset is unreachable)
  Install,
  /// Prune superseded cache generations
  Activate,
  /// Resolve a URL through the cache and print the body to stdout
  Get {
    /// URL or origin-relative path
    url: String,
    /// Treat the request as a document navigation
    #[arg(long)]
    document: bool,
  },
  /// Warm a set of URLs into the cache in one atomic batch
  Precache { urls: Vec<String> },
  /// Record an analytics event (queued while offline)
  Track {
    event: String,
    /// Event payload as a JSON object
    #[arg(long)]
    data: Option<String>,
  },
  /// Deliver any queued events now
  Flush,
  /// Run the worker loop: probe connectivity, flush on reconnect, warm the cache
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cachette=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let net = HttpClient::new()?;
  let endpoint = HttpDelivery::new(config.analytics.endpoint.clone())?;
  let cache_store = SqliteCacheStore::open(config.storage.path.as_deref())?;
  let queue_store = SqliteQueueStore::open(config.storage.path.as_deref())?;

  // Initial connectivity comes from a live probe, not an assumption
  let online = net.probe(&config.site.origin).await;

  let mut worker = Worker::new(
    &config,
    cache_store,
    queue_store,
    Arc::new(net.clone()),
    Arc::new(endpoint),
    online,
  )?;

  match args.command {
    Cmd::Install => {
      worker.install().await?;
    }
    Cmd::Activate => {
      worker.activate().await?;
    }
    Cmd::Get { url, document } => {
      let url = resolve_url(&config, &url)?;
      let destination = if document {
        Destination::Document
      } else {
        Destination::Other
      };

      // A one-shot host takes control immediately
      worker.activate().await?;

      let request = ResourceRequest::get(url, destination);
      let resolution = worker.on_intercept(&request).await?;
      if resolution.is_passthrough() {
        return Err(eyre!("Request not intercepted (origin not allow-listed)"));
      }
      if let Some(response) = resolution.response() {
        std::io::stdout().write_all(&response.body)?;
      }
    }
    Cmd::Precache { urls } => {
      let urls: Vec<Url> = urls
        .iter()
        .map(|u| resolve_url(&config, u))
        .collect::<Result<_>>()?;
      let count = worker.precache(&urls).await?;
      println!("precached {count} urls");
    }
    Cmd::Track { event, data } => {
      let data = match data {
        Some(text) => serde_json::from_str(&text)
          .map_err(|e| eyre!("--data must be a JSON object: {}", e))?,
        None => serde_json::Map::new(),
      };
      worker.track(&event, data).await?;
      if worker.queued_events() > 0 {
        println!("queued ({} pending)", worker.queued_events());
      } else {
        println!("delivered");
      }
    }
    Cmd::Flush => {
      let delivered = worker.flush().await?;
      println!("delivered {delivered} events, {} pending", worker.queued_events());
    }
    Cmd::Run => {
      worker.install().await?;
      worker.activate().await?;
      tracing::info!(
        online = worker.is_online(),
        lifecycle = ?worker.lifecycle(),
        "worker ready"
      );

      let mut signals = SignalSource::new(
        net,
        config.site.origin.clone(),
        Duration::from_secs(30),
        Duration::from_secs(5),
      );

      while let Some(signal) = signals.next().await {
        match signal {
          Signal::Connectivity(online) => {
            if let Err(err) = worker.on_connectivity_change(online).await {
              warn!("flush failed, entries kept for next transition: {err}");
            }
          }
          Signal::Warm => {
            let urls = config.warm_urls()?;
            if urls.is_empty() {
              continue;
            }
            match worker.precache(&urls).await {
              Ok(count) => tracing::info!(count, "warmed cache"),
              Err(err) => warn!("cache warm failed: {err}"),
            }
          }
        }
      }
    }
  }

  Ok(())
}

/// Accept absolute URLs or origin-relative paths on the command line.
fn resolve_url(config: &config::Config, input: &str) -> Result<Url> {
  let parsed = if input.starts_with("http://") || input.starts_with("https://") {
    Url::parse(input)
  } else {
    config.site.origin.join(input)
  };
  parsed.map_err(|e| eyre!("Invalid URL {}: {}", input, e))
}
