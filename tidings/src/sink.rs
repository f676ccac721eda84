use std::{fmt, future::Future};

use futures_util::{FutureExt, future::BoxFuture};

use crate::{Envelope, Error, Result};

/// Write contract implemented by every reporter.
///
/// A sink receives only the envelopes its [`Filter`](crate::Filter) accepts,
/// one at a time and in stream order. Each sink runs in its own worker task,
/// so a slow or failing sink never holds up the others.
///
/// # Lifecycle Hooks
///
/// - [`on_start`](Self::on_start) - once, before the first write
/// - [`write`](Self::write) - once per matching envelope
/// - [`on_shutdown`](Self::on_shutdown) - once, after the mailbox is drained
/// - [`on_error`](Self::on_error) - after a failed write
///
/// Methods return futures but can be implemented as `async fn` directly.
///
/// # Example
///
/// ```rust
/// use tidings::{Envelope, Result, Sink};
///
/// struct Stdout;
///
/// impl Sink for Stdout {
///     async fn write(&mut self, envelope: &Envelope) -> Result<()> {
///         println!("{} {}", envelope.kind(), envelope.payload());
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send + 'static {
    /// Write a single envelope.
    ///
    /// An error is reported through [`on_error`](Self::on_error) and logged by
    /// the monitor. It never reaches the producer of the event and never
    /// affects other sinks.
    fn write(&mut self, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send;

    /// Called once before the first envelope is written.
    ///
    /// An error here is logged and the sink is retired without receiving
    /// any envelope.
    fn on_start(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Called once after the sink's mailbox has been drained during `stop()`.
    ///
    /// Flush buffered output here.
    fn on_shutdown(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Called after [`write`](Self::write) fails.
    ///
    /// Return `Ok(())` to keep receiving envelopes (the default), or
    /// `Err(error)` to retire this sink for the rest of the monitor's life.
    fn on_error(&mut self, error: Error) -> Result<()> {
        let _ = error;
        Ok(())
    }

    /// Human readable name used to derive the reporter's id.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Object-safe mirror of [`Sink`], implemented for every sink.
pub(crate) trait ErasedSink: Send {
    fn write<'a>(&'a mut self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>>;
    fn on_start(&mut self) -> BoxFuture<'_, Result<()>>;
    fn on_shutdown(&mut self) -> BoxFuture<'_, Result<()>>;
    fn on_error(&mut self, error: Error) -> Result<()>;
    fn name(&self) -> &str;
}

impl<S: Sink> ErasedSink for S {
    fn write<'a>(&'a mut self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Sink::write(self, envelope).boxed()
    }

    fn on_start(&mut self) -> BoxFuture<'_, Result<()>> {
        Sink::on_start(self).boxed()
    }

    fn on_shutdown(&mut self) -> BoxFuture<'_, Result<()>> {
        Sink::on_shutdown(self).boxed()
    }

    fn on_error(&mut self, error: Error) -> Result<()> {
        Sink::on_error(self, error)
    }

    fn name(&self) -> &str {
        Sink::name(self)
    }
}

/// A constructed sink, ready to be installed in a monitor.
///
/// This is what reporter factories return and what
/// [`ReporterSpec::instance`](crate::ReporterSpec::instance) wraps.
pub struct Reporter(pub(crate) Box<dyn ErasedSink>);

impl Reporter {
    pub fn new<S: Sink>(sink: S) -> Self {
        Reporter(Box::new(sink))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl<S: Sink> From<S> for Reporter {
    fn from(sink: S) -> Self {
        Reporter::new(sink)
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reporter").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;

    struct Counting(usize);

    impl Sink for Counting {
        async fn write(&mut self, _envelope: &Envelope) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn default_name_is_type_name() {
        let reporter = Reporter::new(Counting(0));
        assert_eq!(reporter.name(), "Counting");
    }

    #[tokio::test]
    async fn erased_sink_forwards_writes() {
        let mut reporter = Reporter::new(Counting(0));
        let envelope = Envelope::new(EventKind::Log, serde_json::Value::Null);
        reporter.0.on_start().await.unwrap();
        reporter.0.write(&envelope).await.unwrap();
        reporter.0.write(&envelope).await.unwrap();
        reporter.0.on_shutdown().await.unwrap();
        assert!(reporter.0.on_error(Error::config("ignored")).is_ok());
    }
}
