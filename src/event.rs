//! Host-side signal plumbing for the long-running worker loop.

use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::net::HttpClient;

/// Signals consumed by the `run` loop.
#[derive(Debug)]
pub enum Signal {
  /// Result of a reachability probe.
  Connectivity(bool),
  /// Deferred warm-list precache trigger.
  Warm,
}

/// Produces signals from a periodic connectivity probe and a one-shot warm
/// timer, standing in for the platform's online/offline and idle events.
pub struct SignalSource {
  rx: mpsc::UnboundedReceiver<Signal>,
}

impl SignalSource {
  pub fn new(
    client: HttpClient,
    probe_url: Url,
    probe_interval: Duration,
    warm_after: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Warm trigger fires once, well after startup, so it cannot compete
    // with first-paint resource loads.
    let warm_tx = tx.clone();
    tokio::spawn(async move {
      tokio::time::sleep(warm_after).await;
      let _ = warm_tx.send(Signal::Warm);
    });

    tokio::spawn(async move {
      loop {
        let online = client.probe(&probe_url).await;
        if tx.send(Signal::Connectivity(online)).is_err() {
          break;
        }
        tokio::time::sleep(probe_interval).await;
      }
    });

    Self { rx }
  }

  /// Receive the next signal
  pub async fn next(&mut self) -> Option<Signal> {
    self.rx.recv().await
  }
}
