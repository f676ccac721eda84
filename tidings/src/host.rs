//! The host side of the collector: named event channels.
//!
//! The monitor never emits events itself. It subscribes handlers to the
//! host's channels through the [`Host`] trait and turns every invocation into
//! an [`Envelope`](crate::Envelope). [`EventBus`] is a ready-made in-process
//! host for applications that do not have an event system of their own, and
//! for tests.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::{Error, Result};

/// Identifies one handler registration on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked by the host once per event occurrence, with the payload
/// and the tags the host attached to it.
pub type Handler = Arc<dyn Fn(Value, Vec<String>) + Send + Sync>;

/// The host application's event system, as seen by the collector.
///
/// Implementations must invoke a handler once per occurrence on its channel,
/// never before `subscribe` has resolved, and never after `unsubscribe` has
/// resolved.
pub trait Host: Send + Sync + 'static {
    /// Register `handler` on the named channel.
    fn subscribe(&self, channel: &str, handler: Handler) -> BoxFuture<'_, Result<SubscriptionId>>;

    /// Remove a registration made by [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, Result<()>>;

    /// Number of currently open client connections, if the host tracks them.
    /// Reported in every ops sample.
    fn active_connections(&self) -> Option<u64> {
        None
    }
}

#[derive(Default)]
struct Channels {
    handlers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    closed: bool,
}

/// In-process [`Host`] backed by a handler table.
///
/// Cheap to clone; clones share the same table.
///
/// ```rust
/// use tidings::EventBus;
/// use serde_json::json;
///
/// let bus = EventBus::new();
/// // Nobody listens yet: the event is simply not observed.
/// assert_eq!(bus.emit("log", json!({ "data": "booting" })), 0);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<Mutex<Channels>>,
    next_id: Arc<AtomicU64>,
    connections: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an untagged event. Returns the number of handlers invoked.
    pub fn emit(&self, channel: &str, payload: Value) -> usize {
        self.emit_tagged(channel, payload, Vec::<String>::new())
    }

    /// Emit an event with tags. Returns the number of handlers invoked.
    ///
    /// Handlers run synchronously on the caller's thread, outside the
    /// table lock.
    pub fn emit_tagged<I, S>(&self, channel: &str, payload: Value, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handlers: Vec<Handler> = match self.channels.lock() {
            Ok(channels) => channels
                .handlers
                .get(channel)
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        if handlers.is_empty() {
            return 0;
        }
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        for handler in &handlers {
            handler(payload.clone(), tags.clone());
        }
        handlers.len()
    }

    /// Number of handlers registered on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|c| c.handlers.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Total number of handlers across all channels.
    pub fn total_listeners(&self) -> usize {
        self.channels
            .lock()
            .map(|c| c.handlers.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Update the connection gauge reported through
    /// [`Host::active_connections`].
    pub fn set_active_connections(&self, count: u64) {
        self.connections.store(count, Ordering::Relaxed);
    }

    /// Refuse all further subscriptions, as a host does once it is shutting
    /// down. Existing handlers stay registered until unsubscribed.
    pub fn close(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.closed = true;
        }
    }

    fn add(&self, channel: &str, handler: Handler) -> Result<SubscriptionId> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::lifecycle("event bus lock poisoned"))?;
        if channels.closed {
            return Err(Error::lifecycle(format!(
                "cannot subscribe to \"{channel}\": event bus is closed"
            )));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        channels
            .handlers
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    fn remove(&self, id: SubscriptionId) -> Result<()> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::lifecycle("event bus lock poisoned"))?;
        for handlers in channels.handlers.values_mut() {
            handlers.retain(|(sid, _)| *sid != id);
        }
        channels.handlers.retain(|_, hs| !hs.is_empty());
        Ok(())
    }
}

impl Host for EventBus {
    fn subscribe(&self, channel: &str, handler: Handler) -> BoxFuture<'_, Result<SubscriptionId>> {
        let res = self.add(channel, handler);
        async move { res }.boxed()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, Result<()>> {
        let res = self.remove(id);
        async move { res }.boxed()
    }

    fn active_connections(&self) -> Option<u64> {
        Some(self.connections.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.total_listeners())
            .field("connections", &self.connections.load(Ordering::Relaxed))
            .finish()
    }
}
