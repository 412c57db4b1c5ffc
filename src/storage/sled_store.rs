use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::StoreEvent;
use super::StoreEventSender;
use super::ValueStore;
use crate::Result;
use crate::StoreError;

/// How often a watcher thread checks for cancellation while idle
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Durable local store backed by a sled tree.
///
/// Each subscription owns a thread blocked on `Tree::watch_prefix`; sled
/// delivers prefix matches, so events are filtered down to the exact key.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
    subscriptions: DashMap<String, CancellationToken>,
}

impl SledStore {
    pub fn open(
        path: impl AsRef<Path>,
        namespace: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::Config::default()
            .path(path)
            .use_compression(true)
            .flush_every_ms(Some(10))
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                StoreError::Sled(e)
            })?;
        Self::from_db(db, namespace)
    }

    pub fn from_db(
        db: sled::Db,
        namespace: &str,
    ) -> Result<Self> {
        let tree = db.open_tree(namespace)?;
        Ok(Self {
            db,
            tree,
            subscriptions: DashMap::new(),
        })
    }

    pub fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn delete(
        &self,
        key: &str,
    ) -> Result<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().cancel();
        }
    }
}

#[async_trait]
impl ValueStore for SledStore {
    async fn read(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        let value = self.tree.get(key.as_bytes())?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
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
        let subscriber = self.tree.watch_prefix(key.as_bytes());
        let token = CancellationToken::new();
        let watched_key = key.to_string();
        let thread_token = token.clone();

        std::thread::Builder::new()
            .name(format!("confr-sled-watch-{key}"))
            .spawn(move || watch_key(watched_key, subscriber, sink, thread_token))
            .map_err(|e| StoreError::Subscribe {
                key: key.to_string(),
                reason: format!("watcher thread did not start: {e}"),
            })?;

        if let Some(previous) = self.subscriptions.insert(key.to_string(), token) {
            previous.cancel();
        }
        debug!(key, "Sled watcher started");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        key: &str,
    ) -> Result<()> {
        if let Some((_, token)) = self.subscriptions.remove(key) {
            token.cancel();
            debug!(key, "Sled watcher cancelled");
        }
        Ok(())
    }
}

fn watch_key(
    key: String,
    mut subscriber: sled::Subscriber,
    sink: StoreEventSender,
    token: CancellationToken,
) {
    while !token.is_cancelled() {
        let event = match subscriber.next_timeout(WATCH_POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let change = match event {
            sled::Event::Insert { key: k, value } if k.as_ref() == key.as_bytes() => StoreEvent {
                key: key.clone(),
                value: Some(String::from_utf8_lossy(&value).into_owned()),
            },
            sled::Event::Remove { key: k } if k.as_ref() == key.as_bytes() => StoreEvent {
                key: key.clone(),
                value: None,
            },
            _ => continue,
        };

        if token.is_cancelled() || sink.send(change).is_err() {
            break;
        }
    }
    trace!(key, "Sled watcher stopped");
}
