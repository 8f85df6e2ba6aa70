//! Worker façade wiring the resolver, the event queue, and connectivity.
//!
//! Host adapters translate platform events into calls on this type:
//! `on_intercept` for outbound requests, `on_message` for page commands,
//! `on_connectivity_change` for reachability signals.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStore, NetworkClient, Resolution, Resolver, ResourceRequest};
use crate::config::Config;
use crate::connectivity::{Connectivity, Transition};
use crate::queue::{DeliveryEndpoint, EventQueue, QueueStore};

/// Runtime commands accepted from the page context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
  /// Promote the waiting worker immediately.
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Warm the given URLs into the cache.
  #[serde(rename = "CACHE_URLS")]
  CacheUrls { urls: Vec<Url> },
}

/// Lifecycle of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Constructed; static assets not yet cached.
  Registered,
  /// Static assets cached; awaiting promotion.
  Waiting,
  /// Superseded generations pruned; intercepting requests.
  Active,
}

pub struct Worker<C: CacheStore + 'static, Q: QueueStore> {
  resolver: Resolver<C>,
  queue: EventQueue<Q>,
  connectivity: Connectivity,
  lifecycle: Lifecycle,
  static_assets: Vec<Url>,
}

impl<C: CacheStore + 'static, Q: QueueStore> Worker<C, Q> {
  pub fn new(
    config: &Config,
    cache_store: C,
    queue_store: Q,
    net: Arc<dyn NetworkClient>,
    endpoint: Arc<dyn DeliveryEndpoint>,
    online: bool,
  ) -> Result<Self> {
    let resolver = Resolver::new(
      cache_store,
      net,
      &config.cache.generation,
      &config.site.origin,
      &config.site.allowed_origins,
      &config.site.offline_path,
    )?;
    let queue = EventQueue::new(queue_store, endpoint, online);
    let static_assets = config.static_asset_urls()?;

    Ok(Self {
      resolver,
      queue,
      connectivity: Connectivity::new(online),
      lifecycle: Lifecycle::Registered,
      static_assets,
    })
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn queued_events(&self) -> usize {
    self.queue.len()
  }

  /// Cache the static asset manifest in one atomic batch.
  ///
  /// Any unreachable asset fails the install and leaves the worker where it
  /// was; the previously active version keeps serving.
  pub async fn install(&mut self) -> Result<()> {
    let count = self.resolver.precache(&self.static_assets).await?;
    if self.lifecycle == Lifecycle::Registered {
      self.lifecycle = Lifecycle::Waiting;
    }
    info!(count, "installed static assets");
    Ok(())
  }

  /// Prune superseded cache generations, then begin intercepting.
  pub async fn activate(&mut self) -> Result<()> {
    let removed = self.resolver.activate()?;
    self.lifecycle = Lifecycle::Active;
    info!(removed, "activated");
    Ok(())
  }

  /// Inbound request interception. Before activation everything passes
  /// through, so two cache schemas are never served at once.
  pub async fn on_intercept(&self, request: &ResourceRequest) -> Result<Resolution> {
    if self.lifecycle != Lifecycle::Active {
      return Ok(Resolution::Passthrough);
    }
    self.resolver.resolve(request).await
  }

  /// Handle a raw command message from the page context.
  pub async fn on_message(&mut self, raw: &str) -> Result<()> {
    let command: Command =
      serde_json::from_str(raw).map_err(|e| eyre!("Unrecognized command message: {}", e))?;
    self.on_command(command).await
  }

  pub async fn on_command(&mut self, command: Command) -> Result<()> {
    match command {
      Command::SkipWaiting => {
        if self.lifecycle == Lifecycle::Waiting {
          self.activate().await
        } else {
          debug!(lifecycle = ?self.lifecycle, "skip-waiting ignored");
          Ok(())
        }
      }
      Command::CacheUrls { urls } => {
        self.resolver.precache(&urls).await?;
        Ok(())
      }
    }
  }

  /// Platform connectivity signal.
  ///
  /// Duplicate signals are no-ops; the offline→online edge runs exactly one
  /// flush pass. Returns the number of events delivered.
  pub async fn on_connectivity_change(&mut self, online: bool) -> Result<usize> {
    match self.connectivity.signal(online) {
      Some(Transition::CameOnline) => {
        info!("connectivity restored");
        self.queue.set_online(true);
        self.queue.flush().await
      }
      Some(Transition::WentOffline) => {
        info!("connectivity lost");
        self.queue.set_online(false);
        Ok(0)
      }
      None => Ok(0),
    }
  }

  /// Record an analytics event; queued while offline.
  pub async fn track(
    &mut self,
    event: &str,
    data: serde_json::Map<String, serde_json::Value>,
  ) -> Result<()> {
    self.queue.track(event, data).await
  }

  /// Deliver any queued events now.
  pub async fn flush(&mut self) -> Result<usize> {
    self.queue.flush().await
  }

  /// Warm extra URLs into the cache, atomically.
  pub async fn precache(&self, urls: &[Url]) -> Result<usize> {
    self.resolver.precache(urls).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::Mutex;

  use crate::cache::{Destination, SqliteCacheStore, StoredResponse};
  use crate::config::{AnalyticsConfig, CacheConfig, SiteConfig, StorageConfig};
  use crate::queue::{QueueEntry, SqliteQueueStore};

  struct FakeNetwork {
    responses: Mutex<HashMap<String, StoredResponse>>,
  }

  impl FakeNetwork {
    fn with(urls: &[&str]) -> Arc<Self> {
      let mut responses = HashMap::new();
      for url in urls {
        responses.insert(
          url.to_string(),
          StoredResponse {
            status: 200,
            headers: vec![],
            body: url.as_bytes().to_vec(),
          },
        );
      }
      Arc::new(Self {
        responses: Mutex::new(responses),
      })
    }
  }

  #[async_trait]
  impl NetworkClient for FakeNetwork {
    async fn fetch(&self, request: &ResourceRequest) -> Result<StoredResponse> {
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("network unreachable: {}", request.url))
    }
  }

  struct FakeEndpoint {
    delivered: Mutex<Vec<String>>,
  }

  impl FakeEndpoint {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        delivered: Mutex::new(Vec::new()),
      })
    }

    fn delivered(&self) -> Vec<String> {
      self.delivered.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl DeliveryEndpoint for FakeEndpoint {
    async fn deliver(&self, entry: &QueueEntry) -> Result<()> {
      self.delivered.lock().unwrap().push(entry.event.clone());
      Ok(())
    }
  }

  fn config() -> Config {
    Config {
      site: SiteConfig {
        origin: Url::parse("https://blog.test").unwrap(),
        allowed_origins: vec![],
        offline_path: "/offline.html".to_string(),
      },
      cache: CacheConfig {
        generation: "blog-v1".to_string(),
        static_assets: vec!["/".to_string(), "/offline.html".to_string()],
        warm: vec![],
      },
      analytics: AnalyticsConfig {
        endpoint: Url::parse("https://blog.test/api/events").unwrap(),
      },
      storage: StorageConfig::default(),
    }
  }

  fn worker(
    net: Arc<FakeNetwork>,
    endpoint: Arc<FakeEndpoint>,
    online: bool,
  ) -> Worker<SqliteCacheStore, SqliteQueueStore> {
    Worker::new(
      &config(),
      SqliteCacheStore::in_memory().unwrap(),
      SqliteQueueStore::in_memory().unwrap(),
      net,
      endpoint,
      online,
    )
    .unwrap()
  }

  fn document(url: &str) -> ResourceRequest {
    ResourceRequest::get(Url::parse(url).unwrap(), Destination::Document)
  }

  #[test]
  fn test_command_parsing() {
    let skip: Command = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(skip, Command::SkipWaiting);

    let cache: Command =
      serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["https://blog.test/a"]}"#).unwrap();
    assert_eq!(
      cache,
      Command::CacheUrls {
        urls: vec![Url::parse("https://blog.test/a").unwrap()]
      }
    );

    assert!(serde_json::from_str::<Command>(r#"{"type":"NOPE"}"#).is_err());
  }

  #[tokio::test]
  async fn test_no_interception_before_activation() {
    let net = FakeNetwork::with(&["https://blog.test/", "https://blog.test/offline.html"]);
    let mut worker = worker(net, FakeEndpoint::new(), true);

    let resolution = worker.on_intercept(&document("https://blog.test/")).await.unwrap();
    assert!(resolution.is_passthrough());

    worker.install().await.unwrap();
    assert_eq!(worker.lifecycle(), Lifecycle::Waiting);

    // Still waiting: not intercepting yet
    let resolution = worker.on_intercept(&document("https://blog.test/")).await.unwrap();
    assert!(resolution.is_passthrough());

    worker.on_message(r#"{"type":"SKIP_WAITING"}"#).await.unwrap();
    assert_eq!(worker.lifecycle(), Lifecycle::Active);

    let resolution = worker.on_intercept(&document("https://blog.test/")).await.unwrap();
    assert!(!resolution.is_passthrough());
  }

  #[tokio::test]
  async fn test_install_fails_atomically_on_unreachable_asset() {
    // offline.html missing from the network
    let net = FakeNetwork::with(&["https://blog.test/"]);
    let mut worker = worker(net, FakeEndpoint::new(), true);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.lifecycle(), Lifecycle::Registered);
  }

  #[tokio::test]
  async fn test_cache_urls_command_precaches() {
    let net = FakeNetwork::with(&[
      "https://blog.test/",
      "https://blog.test/offline.html",
      "https://blog.test/pages/extra.html",
    ]);
    let mut worker = worker(net, FakeEndpoint::new(), true);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    worker
      .on_message(r#"{"type":"CACHE_URLS","urls":["https://blog.test/pages/extra.html"]}"#)
      .await
      .unwrap();

    let resolution = worker
      .on_intercept(&document("https://blog.test/pages/extra.html"))
      .await
      .unwrap();
    assert!(!resolution.is_passthrough());
  }

  #[tokio::test]
  async fn test_duplicate_online_signals_flush_once() {
    let net = FakeNetwork::with(&[]);
    let endpoint = FakeEndpoint::new();
    let mut worker = worker(net, endpoint.clone(), false);

    worker.track("a", serde_json::Map::new()).await.unwrap();
    worker.track("b", serde_json::Map::new()).await.unwrap();

    let first = worker.on_connectivity_change(true).await.unwrap();
    let second = worker.on_connectivity_change(true).await.unwrap();

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    // Each entry delivered exactly once
    assert_eq!(endpoint.delivered(), vec!["a", "b"]);
  }

  #[tokio::test]
  async fn test_offline_signal_stops_immediate_delivery() {
    let net = FakeNetwork::with(&[]);
    let endpoint = FakeEndpoint::new();
    let mut worker = worker(net, endpoint.clone(), true);

    worker.on_connectivity_change(false).await.unwrap();
    worker.track("late", serde_json::Map::new()).await.unwrap();

    assert!(endpoint.delivered().is_empty());
    assert_eq!(worker.queued_events(), 1);
  }
}
