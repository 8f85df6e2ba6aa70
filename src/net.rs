//! reqwest-backed implementations of the network and delivery seams.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::cache::{NetworkClient, ResourceRequest, StoredResponse};
use crate::queue::{DeliveryEndpoint, QueueEntry};

/// HTTP client used for resource fetches and connectivity probes.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Cheap reachability check; any response at all counts as online.
  pub async fn probe(&self, url: &Url) -> bool {
    self.client.head(url.clone()).send().await.is_ok()
  }
}

#[async_trait]
impl NetworkClient for HttpClient {
  async fn fetch(&self, request: &ResourceRequest) -> Result<StoredResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body for {}: {}", request.url, e))?
      .to_vec();

    Ok(StoredResponse {
      status,
      headers,
      body,
    })
  }
}

/// Delivers queued events to the remote analytics endpoint.
///
/// Success is any 2xx response; everything else, including transport errors,
/// is a delivery failure and the entry stays queued.
#[derive(Clone)]
pub struct HttpDelivery {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpDelivery {
  pub fn new(endpoint: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to build delivery client: {}", e))?;

    Ok(Self { client, endpoint })
  }
}

#[async_trait]
impl DeliveryEndpoint for HttpDelivery {
  async fn deliver(&self, entry: &QueueEntry) -> Result<()> {
    let response = self
      .client
      .post(self.endpoint.clone())
      .json(entry)
      .send()
      .await
      .map_err(|e| eyre!("Delivery to {} failed: {}", self.endpoint, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Delivery to {} rejected with status {}",
        self.endpoint,
        response.status()
      ));
    }

    Ok(())
  }
}
