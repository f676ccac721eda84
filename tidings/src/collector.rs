use std::{fmt, sync::Arc};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    Envelope, EventKind, Host, Result, SubscriptionId, ValidatedConfig, host::Handler,
};

/// Host channel carrying server-level log entries.
pub const LOG_CHANNEL: &str = "log";
/// Host channel carrying request-scoped log entries.
pub const REQUEST_CHANNEL: &str = "request";
/// Host channel carrying internal request errors.
pub const REQUEST_ERROR_CHANNEL: &str = "request-error";

/// Subscribes to the host's channels and normalizes every occurrence into an
/// [`Envelope`] on the monitor's stream.
///
/// | Host channel | Envelope kind |
/// |--------------|---------------|
/// | `log` | [`EventKind::Log`] |
/// | `request` | [`EventKind::Request`] |
/// | `request-error` | [`EventKind::Error`] |
/// | `response` *or* `tail` | [`EventKind::Response`] |
/// | each extension | [`EventKind::Extension`] |
///
/// Subscriptions exist only between [`start`](Self::start) and
/// [`stop`](Self::stop). Events the host emits outside that window are not
/// observed.
pub struct EventCollector {
    host: Arc<dyn Host>,
    routes: Vec<(String, EventKind)>,
    subscriptions: Vec<SubscriptionId>,
}

impl EventCollector {
    pub fn new(host: Arc<dyn Host>, config: &ValidatedConfig) -> Self {
        let mut routes = vec![
            (LOG_CHANNEL.to_string(), EventKind::Log),
            (REQUEST_CHANNEL.to_string(), EventKind::Request),
            (REQUEST_ERROR_CHANNEL.to_string(), EventKind::Error),
            (
                config.response_event.channel().to_string(),
                EventKind::Response,
            ),
        ];
        routes.extend(
            config
                .extensions
                .iter()
                .map(|kind| (kind.label().into_owned(), kind.clone())),
        );
        Self {
            host,
            routes,
            subscriptions: Vec::new(),
        }
    }

    /// Host channels this collector subscribes to, in subscription order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(channel, _)| channel.as_str())
    }

    /// Subscribe to every channel.
    ///
    /// # Errors
    ///
    /// Propagates the host's error. Subscriptions made before the failure are
    /// removed again, so a failed start leaves nothing behind.
    pub async fn start(&mut self, sender: UnboundedSender<Arc<Envelope>>) -> Result<()> {
        if self.is_subscribed() {
            return Ok(());
        }
        for index in 0..self.routes.len() {
            let (channel, kind) = self.routes[index].clone();
            let handler = envelope_handler(kind, sender.clone());
            match self.host.subscribe(&channel, handler).await {
                Ok(id) => self.subscriptions.push(id),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "subscription failed, rolling back");
                    // Rollback is best effort; the subscribe error is what gets reported.
                    let _ = self.stop().await;
                    return Err(e);
                }
            }
        }
        tracing::debug!(channels = self.subscriptions.len(), "collector subscribed");
        Ok(())
    }

    /// Remove every subscription. Safe to call when not started.
    ///
    /// # Errors
    ///
    /// Every subscription is attempted; the first host error is returned.
    pub async fn stop(&mut self) -> Result<()> {
        let mut first_err = None;
        for id in self.subscriptions.drain(..) {
            if let Err(e) = self.host.unsubscribe(id).await {
                tracing::warn!(subscription = %id, error = %e, "unsubscribe failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }
}

fn envelope_handler(kind: EventKind, sender: UnboundedSender<Arc<Envelope>>) -> Handler {
    Arc::new(move |payload: Value, tags: Vec<String>| {
        let envelope = Envelope::new(kind.clone(), payload).with_tags(tags);
        if sender.send(Arc::new(envelope)).is_err() {
            tracing::trace!(kind = %kind, "stream closed, event not collected");
        }
    })
}

impl fmt::Debug for EventCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollector")
            .field("routes", &self.routes)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}
