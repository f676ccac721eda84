use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;

use super::{Counters, MailboxReceiver, panic_message};
use crate::{Envelope, Error, Reporter, ReporterId};

/// Drives one reporter: `on_start`, then every envelope in its mailbox,
/// then `on_shutdown` once the mailbox is closed and empty.
///
/// Write errors go to the sink's `on_error` hook. A panic anywhere in the
/// sink retires it; the other reporters are unaffected.
pub(crate) struct Worker {
    id: ReporterId,
    reporter: Reporter,
    receiver: MailboxReceiver,
    counters: Arc<Counters>,
}

enum Delivery {
    Continue,
    Retire,
}

impl Worker {
    pub fn new(
        id: ReporterId,
        reporter: Reporter,
        receiver: MailboxReceiver,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            reporter,
            receiver,
            counters,
        }
    }

    pub async fn run(mut self) {
        let started = AssertUnwindSafe(self.reporter.0.on_start())
            .catch_unwind()
            .await;
        match started {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(reporter = %self.id, error = %e, "reporter failed to start, retiring");
                self.retire();
                return;
            }
            Err(panic) => {
                tracing::error!(reporter = %self.id, panic = %panic_message(&*panic), "reporter panicked on start, retiring");
                self.retire();
                return;
            }
        }

        while let Some(envelope) = self.receiver.recv(&self.counters).await {
            if let Delivery::Retire = self.deliver(&envelope).await {
                self.retire();
                return;
            }
        }

        let stopped = AssertUnwindSafe(self.reporter.0.on_shutdown())
            .catch_unwind()
            .await;
        match stopped {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(reporter = %self.id, error = %e, "reporter shutdown failed"),
            Err(panic) => {
                tracing::error!(reporter = %self.id, panic = %panic_message(&*panic), "reporter panicked on shutdown")
            }
        }
        tracing::trace!(reporter = %self.id, "reporter stopped");
    }

    async fn deliver(&mut self, envelope: &Envelope) -> Delivery {
        let outcome = AssertUnwindSafe(self.reporter.0.write(envelope))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                self.counters.record_written();
                tracing::trace!(reporter = %self.id, event_id = %envelope.id(), "event written");
                Delivery::Continue
            }
            Ok(Err(e)) => {
                self.counters.record_failed();
                let error = Error::sink_write(&self.id, e);
                tracing::warn!(reporter = %self.id, event_id = %envelope.id(), error = %error, "sink write failed");
                match self.reporter.0.on_error(error) {
                    Ok(()) => Delivery::Continue,
                    Err(e) => {
                        tracing::warn!(reporter = %self.id, error = %e, "reporter gave up after write failure, retiring");
                        Delivery::Retire
                    }
                }
            }
            Err(panic) => {
                self.counters.record_failed();
                tracing::error!(reporter = %self.id, event_id = %envelope.id(), panic = %panic_message(&*panic), "sink panicked, retiring");
                Delivery::Retire
            }
        }
    }

    fn retire(&mut self) {
        self.counters.retire();
        // The dispatcher notices the closed mailbox on its next send.
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, OverflowPolicy, Result, Sink, internal::mailbox, reporters::Collecting};
    use serde_json::json;

    struct Flaky {
        calls: usize,
        give_up: bool,
    }

    impl Sink for Flaky {
        async fn write(&mut self, _envelope: &Envelope) -> Result<()> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Err(Error::config("odd call"))
            } else {
                Ok(())
            }
        }

        fn on_error(&mut self, error: Error) -> Result<()> {
            if self.give_up { Err(error) } else { Ok(()) }
        }
    }

    struct Bomb;

    impl Sink for Bomb {
        async fn write(&mut self, _envelope: &Envelope) -> Result<()> {
            panic!("boom");
        }
    }

    /// Queue `n` envelopes, close the mailbox and run the worker to completion.
    async fn run(reporter: Reporter, n: usize) -> Arc<Counters> {
        let (tx, rx) = mailbox(OverflowPolicy::Unbounded, 1);
        let counters = Arc::new(Counters::default());
        for _ in 0..n {
            tx.try_send(Arc::new(Envelope::new(EventKind::Log, json!({}))))
                .unwrap();
        }
        drop(tx);
        Worker::new(ReporterId::new("test"), reporter, rx, counters.clone())
            .run()
            .await;
        counters
    }

    #[tokio::test]
    async fn writes_every_envelope_then_stops() {
        let sink = Collecting::new();
        let counters = run(Reporter::new(sink.clone()), 3).await;
        assert_eq!(sink.len(), 3);
        assert_eq!(counters.snapshot().written, 3);
        assert!(!counters.snapshot().retired);
    }

    #[tokio::test]
    async fn write_errors_are_counted_and_survived() {
        let sink = Flaky {
            calls: 0,
            give_up: false,
        };
        let counters = run(Reporter::new(sink), 4).await;
        let stats = counters.snapshot();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.written, 2);
        assert!(!stats.retired);
    }

    #[tokio::test]
    async fn on_error_can_retire_the_reporter() {
        let sink = Flaky {
            calls: 0,
            give_up: true,
        };
        let counters = run(Reporter::new(sink), 4).await;
        let stats = counters.snapshot();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 0);
        assert!(stats.retired);
    }

    #[tokio::test]
    async fn panicking_sink_is_retired() {
        let counters = run(Reporter::new(Bomb), 2).await;
        let stats = counters.snapshot();
        assert_eq!(stats.failed, 1);
        assert!(stats.retired);
    }
}
