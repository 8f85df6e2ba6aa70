//! Cache-first request resolution with a durable, generation-scoped store.
//!
//! This module provides the resource cache resolver:
//! - Serves intercepted GET requests from the store, refreshing in the background
//! - Falls back to the network on a miss, then to an offline document
//! - Precaches asset batches atomically at install time
//! - Prunes superseded store generations at activation

mod layer;
mod storage;
mod traits;

pub use layer::Resolver;
pub use storage::{CacheStore, SqliteCacheStore};
pub use traits::{Destination, NetworkClient, Resolution, ResourceRequest, StoredResponse};
