//! Value change dispatcher
//!
//! Bridges store-level change streams to the listeners of every session that
//! watches a key. The dispatcher is the only writer of the key → watcher
//! table and holds exactly one store subscription per actively watched key.
//!
//! # Watcher lifecycle
//!
//! ```text
//!   Unwatched --register--> Active { value, listeners } --last deregister--> Retired
//!       |                                                                    ^
//!       +--------------------- subscribe/read failure -----------------------+
//! ```
//!
//! Every transition happens under the watcher's own lock. A `Retired` watcher
//! has already left the table; callers that raced with its teardown look the
//! key up again and start a fresh watcher.
//!
//! Each active watcher owns the event sink of its store subscription and a
//! pump task draining it, which pushes [`ValueChanged`] messages onto each
//! listener's channel. Events still queued from a torn-down subscription die
//! with its retired watcher and never reach a later watcher of the same key.
//! The dispatcher never runs session code.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::metrics::ACTIVE_WATCHERS;
use crate::metrics::NOTIFICATIONS_FANNED_OUT;
use crate::Result;
use crate::StoreEvent;
use crate::StoreEventSender;
use crate::ValueStore;

pub type ListenerId = u64;

/// Change delivered to a listener. An absent key is reported as an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChanged {
    pub key: String,
    pub value: String,
}

/// A session's registration handle: its identity plus the channel its
/// changes are delivered on.
#[derive(Debug, Clone)]
pub struct Listener {
    id: ListenerId,
    sink: mpsc::UnboundedSender<ValueChanged>,
}

impl Listener {
    pub fn new(
        id: ListenerId,
        sink: mpsc::UnboundedSender<ValueChanged>,
    ) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

enum WatcherState {
    Unwatched,
    Active {
        /// Last value seen for the key
        value: Option<String>,
        listeners: HashMap<ListenerId, Listener>,
    },
    Retired,
}

type WatcherSlot = Arc<AsyncMutex<WatcherState>>;
type WatcherTable = Mutex<HashMap<String, WatcherSlot>>;

pub struct ValueDispatcher {
    store: Arc<dyn ValueStore>,
    watchers: Arc<WatcherTable>,
    next_listener_id: AtomicU64,
    shutdown: CancellationToken,
}

impl ValueDispatcher {
    /// Creates the dispatcher. Event pumps are spawned on the current runtime
    /// as watchers become active.
    pub fn new(store: Arc<dyn ValueStore>) -> Self {
        Self {
            store,
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Allocates a listener id unique within this dispatcher
    pub fn next_listener_id(&self) -> ListenerId {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds `listener` to the watcher of `key` and returns the value known at
    /// registration time, `""` when the key does not exist.
    ///
    /// The first registration for a key subscribes to the store and reads the
    /// initial value. Registering the same listener id twice is a no-op apart
    /// from returning the current value.
    pub async fn register(
        &self,
        key: &str,
        listener: Listener,
    ) -> Result<String> {
        loop {
            let slot = self.slot_or_create(key);
            let mut state = slot.lock().await;

            match &mut *state {
                WatcherState::Retired => continue,
                WatcherState::Active { value, listeners } => {
                    if listeners.insert(listener.id, listener.clone()).is_none() {
                        trace!(key, listener_id = listener.id, "Listener added to watcher");
                    }
                    return Ok(value.clone().unwrap_or_default());
                }
                WatcherState::Unwatched => {}
            }

            let (value, events) = match self.start_watching(key).await {
                Ok(started) => started,
                Err(e) => {
                    *state = WatcherState::Retired;
                    self.remove_slot(key, &slot);
                    return Err(e);
                }
            };

            let listener_id = listener.id;
            *state = WatcherState::Active {
                value: value.clone(),
                listeners: HashMap::from([(listener_id, listener)]),
            };
            tokio::spawn(pump_events(slot.clone(), events, self.shutdown.clone()));
            ACTIVE_WATCHERS.inc();
            debug!(key, listener_id, "Watcher created");
            return Ok(value.unwrap_or_default());
        }
    }

    /// Removes `listener_id` from the watcher of `key`. Removing the last
    /// listener cancels the store subscription and drops the watcher.
    ///
    /// Unknown keys or listeners indicate broken reference counting on the
    /// caller side; they are logged and otherwise ignored.
    pub async fn deregister(
        &self,
        key: &str,
        listener_id: ListenerId,
    ) -> Result<()> {
        let slot = self.watchers.lock().get(key).cloned();
        let Some(slot) = slot else {
            error!(key, listener_id, "There must be some bug! Deregister for a key without watcher");
            return Ok(());
        };

        let mut state = slot.lock().await;
        let WatcherState::Active { listeners, .. } = &mut *state else {
            error!(key, listener_id, "There must be some bug! Deregister for an inactive watcher");
            return Ok(());
        };

        if listeners.remove(&listener_id).is_none() {
            error!(key, listener_id, "There must be some bug! Deregister for an unknown listener");
            return Ok(());
        }
        trace!(key, listener_id, remaining = listeners.len(), "Listener removed from watcher");

        if !listeners.is_empty() {
            return Ok(());
        }

        // Keep the slot locked until the subscription is gone so a concurrent
        // register cannot subscribe before this unsubscribe lands.
        let result = self.store.unsubscribe(key).await;
        *state = WatcherState::Retired;
        self.remove_slot(key, &slot);
        ACTIVE_WATCHERS.dec();
        debug!(key, "Watcher removed");

        if let Err(e) = &result {
            warn!(key, error = %e, "Failed to cancel store subscription");
        }
        result
    }

    /// Number of keys with a live watcher
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Number of listeners registered for `key`
    pub async fn listener_count(
        &self,
        key: &str,
    ) -> usize {
        let slot = self.watchers.lock().get(key).cloned();
        match slot {
            Some(slot) => match &*slot.lock().await {
                WatcherState::Active { listeners, .. } => listeners.len(),
                _ => 0,
            },
            None => 0,
        }
    }

    /// Cancels every store subscription and stops the event pump.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let slots: Vec<(String, WatcherSlot)> = self.watchers.lock().drain().collect();
        for (key, slot) in slots {
            let mut state = slot.lock().await;
            if let WatcherState::Active { .. } = &*state {
                if let Err(e) = self.store.unsubscribe(&key).await {
                    warn!(key, error = %e, "Failed to cancel store subscription during shutdown");
                }
                ACTIVE_WATCHERS.dec();
            }
            *state = WatcherState::Retired;
        }
        debug!("Value dispatcher stopped");
    }

    /// Subscribes with a sink owned by the new watcher and reads the initial
    /// value. Subscribing first means no change between the two is lost.
    async fn start_watching(
        &self,
        key: &str,
    ) -> Result<(Option<String>, mpsc::UnboundedReceiver<StoreEvent>)> {
        let (sink, events): (StoreEventSender, _) = mpsc::unbounded_channel();
        self.store.subscribe(key, sink).await?;
        match self.store.read(key).await {
            Ok(value) => Ok((value, events)),
            Err(e) => {
                if let Err(unsubscribe_error) = self.store.unsubscribe(key).await {
                    warn!(key, error = %unsubscribe_error, "Failed to roll back store subscription");
                }
                Err(e)
            }
        }
    }

    fn slot_or_create(
        &self,
        key: &str,
    ) -> WatcherSlot {
        self.watchers
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(WatcherState::Unwatched)))
            .clone()
    }

    fn remove_slot(
        &self,
        key: &str,
        slot: &WatcherSlot,
    ) {
        let mut watchers = self.watchers.lock();
        if watchers.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            watchers.remove(key);
        }
    }
}

impl Drop for ValueDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Applies the events of one store subscription to its watcher until the
/// watcher retires, the store drops the sink, or the dispatcher shuts down.
async fn pump_events(
    slot: WatcherSlot,
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut state = slot.lock().await;
        let WatcherState::Active { value, listeners } = &mut *state else {
            trace!(key = %event.key, "Dropping change for a retired watcher");
            break;
        };
        *value = event.value.clone();

        let change = ValueChanged {
            key: event.key,
            value: event.value.unwrap_or_default(),
        };
        for listener in listeners.values() {
            match listener.sink.send(change.clone()) {
                Ok(()) => NOTIFICATIONS_FANNED_OUT.inc(),
                Err(_) => warn!(
                    key = %change.key,
                    listener_id = listener.id,
                    "Listener is gone, skipping"
                ),
            }
        }
    }
    trace!("Watcher event pump stopped");
}
