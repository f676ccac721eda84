use std::sync::Arc;

use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
};

use super::Counters;
use crate::{Envelope, OverflowPolicy};

type Payload = Arc<Envelope>;

/// Create one reporter's mailbox for the given policy.
///
/// `capacity` only applies to the bounded policies.
pub(crate) fn mailbox(policy: OverflowPolicy, capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let capacity = capacity.max(1);
    match policy {
        OverflowPolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (MailboxSender::Unbounded(tx), MailboxReceiver::Unbounded(rx))
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (MailboxSender::Ring(tx), MailboxReceiver::Ring(rx))
        }
        OverflowPolicy::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (MailboxSender::Bounded(tx), MailboxReceiver::Bounded(rx))
        }
    }
}

/// Dispatcher side of a reporter's mailbox.
pub(crate) enum MailboxSender {
    Unbounded(mpsc::UnboundedSender<Payload>),
    /// A full ring overwrites its oldest envelope.
    Ring(broadcast::Sender<Payload>),
    Bounded(mpsc::Sender<Payload>),
}

impl MailboxSender {
    /// Only a [`Bounded`](Self::Bounded) mailbox ever reports `Full`.
    pub fn try_send(&self, envelope: Payload) -> Result<(), TrySendError<Payload>> {
        match self {
            MailboxSender::Unbounded(tx) => tx.send(envelope).map_err(|e| TrySendError::Closed(e.0)),
            MailboxSender::Ring(tx) => tx
                .send(envelope)
                .map(|_| ())
                .map_err(|e| TrySendError::Closed(e.0)),
            MailboxSender::Bounded(tx) => tx.try_send(envelope),
        }
    }

    /// Wait for space. Returns the envelope if the mailbox is closed.
    pub async fn send(&self, envelope: Payload) -> Result<(), Payload> {
        match self {
            MailboxSender::Bounded(tx) => tx.send(envelope).await.map_err(|e| e.0),
            _ => self.try_send(envelope).map_err(|e| match e {
                TrySendError::Full(envelope) | TrySendError::Closed(envelope) => envelope,
            }),
        }
    }
}

/// Worker side of a reporter's mailbox.
pub(crate) enum MailboxReceiver {
    Unbounded(mpsc::UnboundedReceiver<Payload>),
    Ring(broadcast::Receiver<Payload>),
    Bounded(mpsc::Receiver<Payload>),
}

impl MailboxReceiver {
    /// Next envelope, or `None` once the mailbox is closed and empty.
    /// Envelopes evicted from a ring are counted as dropped.
    pub async fn recv(&mut self, counters: &Counters) -> Option<Payload> {
        match self {
            MailboxReceiver::Unbounded(rx) => rx.recv().await,
            MailboxReceiver::Bounded(rx) => rx.recv().await,
            MailboxReceiver::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(envelope) => return Some(envelope),
                    Err(broadcast::error::RecvError::Lagged(evicted)) => {
                        counters.record_dropped(evicted);
                        tracing::warn!(evicted, "mailbox full, oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Refuse further envelopes. A ring closes when the receiver is dropped.
    pub fn close(&mut self) {
        match self {
            MailboxReceiver::Unbounded(rx) => rx.close(),
            MailboxReceiver::Bounded(rx) => rx.close(),
            MailboxReceiver::Ring(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use serde_json::json;

    fn envelope(n: u64) -> Payload {
        Arc::new(Envelope::new(EventKind::Log, json!(n)))
    }

    #[tokio::test]
    async fn unbounded_never_reports_full() {
        let (tx, mut rx) = mailbox(OverflowPolicy::Unbounded, 1);
        for n in 0..1000 {
            tx.try_send(envelope(n)).unwrap();
        }
        drop(tx);

        let counters = Counters::default();
        let mut received = 0;
        while rx.recv(&counters).await.is_some() {
            received += 1;
        }
        assert_eq!(received, 1000);
        assert_eq!(counters.snapshot().dropped, 0);
    }

    #[tokio::test]
    async fn ring_keeps_the_newest() {
        let (tx, mut rx) = mailbox(OverflowPolicy::DropOldest, 2);
        for n in 0..5 {
            tx.try_send(envelope(n)).unwrap();
        }
        drop(tx);

        let counters = Counters::default();
        let mut payloads = Vec::new();
        while let Some(envelope) = rx.recv(&counters).await {
            payloads.push(envelope.payload().clone());
        }
        assert_eq!(payloads, vec![json!(3), json!(4)]);
        assert_eq!(counters.snapshot().dropped, 3);
    }

    #[tokio::test]
    async fn dropped_receiver_closes_every_kind() {
        for policy in [
            OverflowPolicy::Unbounded,
            OverflowPolicy::DropOldest,
            OverflowPolicy::Block,
        ] {
            let (tx, rx) = mailbox(policy, 4);
            drop(rx);
            assert!(matches!(
                tx.try_send(envelope(0)),
                Err(TrySendError::Closed(_))
            ));
        }
    }

    #[tokio::test]
    async fn bounded_reports_full() {
        let (tx, _rx) = mailbox(OverflowPolicy::Block, 1);
        tx.try_send(envelope(0)).unwrap();
        assert!(matches!(tx.try_send(envelope(1)), Err(TrySendError::Full(_))));
    }
}
