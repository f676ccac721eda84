use std::sync::Arc;

use futures_util::future::join_all;
use tokio::{
    select,
    sync::mpsc::{UnboundedReceiver, error::TrySendError},
};
use tokio_util::sync::CancellationToken;

use super::{Counters, MailboxSender};
use crate::{Envelope, Filter, ReporterId};

type Payload = Arc<Envelope>;

/// One reporter as seen by the dispatcher.
pub(crate) struct Route {
    pub id: ReporterId,
    pub filter: Filter,
    pub sender: MailboxSender,
    pub counters: Arc<Counters>,
}

/// Reads the monitor's stream and fans every envelope out to the mailboxes
/// of the reporters whose filter accepts it, in registration order.
pub(crate) struct Dispatcher {
    stream: UnboundedReceiver<Payload>,
    routes: Vec<Route>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        stream: UnboundedReceiver<Payload>,
        routes: Vec<Route>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            stream,
            routes,
            cancel_token,
        }
    }

    pub async fn run(mut self) {
        loop {
            select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                maybe_envelope = self.stream.recv() => {
                    let Some(envelope) = maybe_envelope else {
                        break;
                    };
                    self.dispatch(&envelope).await;
                }
            }
        }
        self.shutdown().await;
    }

    async fn dispatch(&mut self, envelope: &Payload) {
        if let Some(to_be_closed) = self.send_event(envelope).await {
            self.routes.retain(|r| {
                let keep = !to_be_closed.contains(&r.id);
                if !keep {
                    r.counters.retire();
                }
                keep
            });
        }
    }

    /// Returns the reporters whose mailbox turned out to be closed.
    async fn send_event(&self, envelope: &Payload) -> Option<Vec<ReporterId>> {
        let mut blocked = None;
        let mut to_be_closed = None;

        for route in self.routes.iter().filter(|r| r.filter.matches(envelope)) {
            match route.sender.try_send(envelope.clone()) {
                Ok(()) => {
                    tracing::trace!(reporter = %route.id, event_id = %envelope.id(), kind = %envelope.kind(), "event dispatched");
                }
                Err(TrySendError::Full(envelope)) => {
                    let fut = async move { (route, route.sender.send(envelope).await) };
                    blocked.get_or_insert_with(Vec::new).push(fut);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(reporter = %route.id, "reporter retired, removing route");
                    to_be_closed
                        .get_or_insert_with(Vec::new)
                        .push(route.id.clone());
                }
            }
        }

        if let Some(b) = blocked.take() {
            for (route, sent) in join_all(b).await {
                if sent.is_err() {
                    tracing::debug!(reporter = %route.id, "reporter retired while blocked, removing route");
                    to_be_closed
                        .get_or_insert_with(Vec::new)
                        .push(route.id.clone());
                }
            }
        }

        to_be_closed
    }

    async fn shutdown(&mut self) {
        self.stream.close();
        let mut drained = 0usize;
        while let Ok(envelope) = self.stream.try_recv() {
            self.dispatch(&envelope).await;
            drained += 1;
        }
        tracing::debug!(drained, "dispatcher stopped");
        // Dropping the routes closes every mailbox; workers finish what is queued.
        self.routes.clear();
    }
}
