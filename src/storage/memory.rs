use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::StoreEvent;
use super::StoreEventSender;
use super::ValueStore;
use crate::Result;
use crate::StoreError;

/// In-process store. Used by tests and single-node deployments where values
/// are pushed in through [`MemoryStore::put`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
    subscriptions: DashMap<String, StoreEventSender>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        let key = key.into();
        let value = value.into();
        // Hold the entry while notifying so notifications for one key keep write order.
        let mut entry = self.values.entry(key.clone()).or_default();
        *entry = value.clone();
        self.notify(&key, Some(value));
    }

    pub fn delete(
        &self,
        key: &str,
    ) {
        if self.values.remove(key).is_some() {
            self.notify(key, None);
        }
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(
        &self,
        key: &str,
    ) -> bool {
        self.subscriptions.contains_key(key)
    }

    fn notify(
        &self,
        key: &str,
        value: Option<String>,
    ) {
        if let Some(sink) = self.subscriptions.get(key) {
            let event = StoreEvent {
                key: key.to_string(),
                value,
            };
            if sink.send(event).is_err() {
                trace!(key, "Subscriber dropped its receiver");
            }
        }
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn read(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn subscribe(
        &self,
        key: &str,
        sink: StoreEventSender,
    ) -> Result<()> {
        if sink.is_closed() {
            return Err(StoreError::Subscribe {
                key: key.to_string(),
                reason: "event sink is closed".to_string(),
            }
            .into());
        }
        trace!(key, "Subscribing");
        self.subscriptions.insert(key.to_string(), sink);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        key: &str,
    ) -> Result<()> {
        trace!(key, "Unsubscribing");
        self.subscriptions.remove(key);
        Ok(())
    }
}
