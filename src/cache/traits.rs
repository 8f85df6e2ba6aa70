//! Core types and traits for request resolution.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use url::Url;

/// What kind of resource an intercepted request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// A full navigable document; gets the offline fallback when unresolvable.
  Document,
  Script,
  Style,
  Image,
  Font,
  Other,
}

impl Destination {
  pub fn is_document(&self) -> bool {
    matches!(self, Destination::Document)
  }
}

/// An outbound request as seen by the resolver.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl ResourceRequest {
  /// Build a GET request for the given URL.
  pub fn get(url: Url, destination: Destination) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination,
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Canonical cache identity: method plus absolute URL.
  ///
  /// The destination is deliberately not part of the key, so a document
  /// navigation and a prefetch of the same URL share one entry.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method.to_ascii_uppercase(), self.url)
  }
}

/// A response payload as kept in the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Outcome of intercepting a request.
#[derive(Debug, Clone)]
pub enum Resolution {
  /// Serve this response.
  Response(StoredResponse),
  /// Not ours to handle; the host forwards the request untouched.
  Passthrough,
}

impl Resolution {
  pub fn is_passthrough(&self) -> bool {
    matches!(self, Resolution::Passthrough)
  }

  pub fn response(&self) -> Option<&StoredResponse> {
    match self {
      Resolution::Response(response) => Some(response),
      Resolution::Passthrough => None,
    }
  }
}

/// Network seam the resolver fetches through.
#[async_trait]
pub trait NetworkClient: Send + Sync {
  /// Perform the request against the real network.
  ///
  /// Non-success statuses are `Ok` responses; `Err` means the request could
  /// not be carried out at all (unreachable host, timeout, ...).
  async fn fetch(&self, request: &ResourceRequest) -> Result<StoredResponse>;
}
