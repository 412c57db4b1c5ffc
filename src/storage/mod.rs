//! Watchable key-value stores the server multiplexes from.
//!
//! The server never owns configuration values. It reads them from a
//! [`ValueStore`] and subscribes to per-key change streams.

mod memory;
mod sled_store;

pub use memory::*;
pub use sled_store::*;

#[cfg(test)]
mod sled_store_test;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::Result;
use crate::StoreBackend;
use crate::StoreConfig;

/// A change observed at the store. `value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    pub value: Option<String>,
}

pub type StoreEventSender = mpsc::UnboundedSender<StoreEvent>;

/// Contract the dispatcher needs from the external store.
///
/// At most one subscription per key is held at a time; `subscribe` for a key
/// that is already subscribed replaces the previous sink.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ValueStore: Send + Sync + 'static {
    async fn read(
        &self,
        key: &str,
    ) -> Result<Option<String>>;

    /// Starts delivering every change of `key` to `sink` until `unsubscribe`.
    ///
    /// # Errors
    /// `StoreError::Subscribe` when `sink` is already closed or the backend
    /// cannot start watching the key.
    async fn subscribe(
        &self,
        key: &str,
        sink: StoreEventSender,
    ) -> Result<()>;

    async fn unsubscribe(
        &self,
        key: &str,
    ) -> Result<()>;
}

/// Opens the backend selected in `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ValueStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory value store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sled => {
            tracing::debug!(path = ?config.db_path, namespace = %config.namespace, "Opening sled value store");
            Ok(Arc::new(SledStore::open(&config.db_path, &config.namespace)?))
        }
    }
}
