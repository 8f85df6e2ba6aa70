//! Cache-first resolution over a durable, generation-scoped store.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStore;
use super::traits::{Destination, NetworkClient, Resolution, ResourceRequest};

/// Resolver that answers intercepted requests from the durable store first,
/// refreshing entries opportunistically in the background.
pub struct Resolver<S: CacheStore> {
  store: Arc<S>,
  net: Arc<dyn NetworkClient>,
  /// Generation this worker version owns; everything else is pruned at activation.
  generation: String,
  origin: String,
  allowed_origins: Vec<String>,
  offline_url: Url,
}

impl<S: CacheStore + 'static> Resolver<S> {
  pub fn new(
    store: S,
    net: Arc<dyn NetworkClient>,
    generation: &str,
    origin: &Url,
    allowed_origins: &[Url],
    offline_path: &str,
  ) -> Result<Self> {
    let offline_url = origin
      .join(offline_path)
      .map_err(|e| eyre!("Invalid offline fallback path {}: {}", offline_path, e))?;

    Ok(Self {
      store: Arc::new(store),
      net,
      generation: generation.to_string(),
      origin: origin.origin().ascii_serialization(),
      allowed_origins: allowed_origins
        .iter()
        .map(|u| u.origin().ascii_serialization())
        .collect(),
      offline_url,
    })
  }

  /// Whether the resolver handles this request at all.
  ///
  /// Only GET requests against the site origin or an allow-listed origin are
  /// intercepted; everything else passes through untouched.
  fn intercepts(&self, request: &ResourceRequest) -> bool {
    if !request.is_get() {
      return false;
    }
    let origin = request.url.origin().ascii_serialization();
    origin == self.origin || self.allowed_origins.contains(&origin)
  }

  /// Resolve a request, cache-first with background refresh.
  ///
  /// 1. Store hit: schedule a detached refresh and return the stored copy
  ///    immediately; the caller never waits for the refresh.
  /// 2. Miss: fetch from the network, cache successful responses, return.
  /// 3. Both unavailable: document navigations get the offline fallback,
  ///    anything else surfaces the fetch failure.
  ///
  /// Store failures (corruption, quota) surface as errors, never as misses.
  pub async fn resolve(&self, request: &ResourceRequest) -> Result<Resolution> {
    if !self.intercepts(request) {
      return Ok(Resolution::Passthrough);
    }

    let key = request.cache_key();

    if let Some(cached) = self.store.get(&self.generation, &key)? {
      debug!(url = %request.url, "serving from cache");
      self.spawn_refresh(request.clone());
      return Ok(Resolution::Response(cached));
    }

    debug!(url = %request.url, "cache miss, fetching");
    match self.net.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(&self.generation, &key, &response)?;
        }
        Ok(Resolution::Response(response))
      }
      Err(err) => {
        if request.destination.is_document() {
          let fallback_key = format!("GET {}", self.offline_url);
          if let Some(fallback) = self.store.get(&self.generation, &fallback_key)? {
            info!(url = %request.url, "offline, serving fallback document");
            return Ok(Resolution::Response(fallback));
          }
        }
        Err(err)
      }
    }
  }

  /// Refresh a cached entry without blocking the caller.
  ///
  /// The task's outcome is never reported back; failures are logged and
  /// dropped. Until the refresh lands, concurrent resolves keep returning
  /// the stored copy.
  fn spawn_refresh(&self, request: ResourceRequest) {
    let store = Arc::clone(&self.store);
    let net = Arc::clone(&self.net);
    let generation = self.generation.clone();

    tokio::spawn(async move {
      let key = request.cache_key();
      match net.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = store.put(&generation, &key, &response) {
            warn!(url = %request.url, "background refresh store failed: {err}");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background refresh skipped");
        }
        Err(err) => {
          debug!(url = %request.url, "background refresh fetch failed: {err}");
        }
      }
    });
  }

  /// Fetch every URL and store the results as one atomic batch.
  ///
  /// A single unreachable or non-success URL fails the whole batch and leaves
  /// the store untouched; the caller may retry.
  pub async fn precache(&self, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| {
      let request = ResourceRequest::get(url.clone(), Destination::Other);
      let net = Arc::clone(&self.net);
      async move {
        let response = net.fetch(&request).await?;
        if !response.is_success() {
          return Err(eyre!(
            "Precache fetch for {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok((request.cache_key(), response))
      }
    });

    let entries = futures::future::try_join_all(fetches).await?;
    self.store.put_batch(&self.generation, &entries)?;

    Ok(entries.len())
  }

  /// Delete every generation except the one this resolver owns.
  ///
  /// Returns the number of generations removed.
  pub fn activate(&self) -> Result<usize> {
    let mut removed = 0;
    for generation in self.store.generations()? {
      if generation != self.generation {
        info!(%generation, "deleting superseded cache generation");
        self.store.delete_generation(&generation)?;
        removed += 1;
      }
    }
    Ok(removed)
  }
}

impl<S: CacheStore> Clone for Resolver<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      net: Arc::clone(&self.net),
      generation: self.generation.clone(),
      origin: self.origin.clone(),
      allowed_origins: self.allowed_origins.clone(),
      offline_url: self.offline_url.clone(),
    }
  }
}
