use crate::{Envelope, EventKind, Result, Sink};

/// A reporter that logs every envelope it receives.
///
/// Log levels follow the event kind:
/// - `debug` - ops samples (one per interval, usually noisy)
/// - `warn` - request errors
/// - `info` - everything else
///
/// Envelopes are emitted under the `tidings::reporters::tracer` target, so
/// they can be routed separately from the monitor's own diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracer;

impl Sink for Tracer {
    async fn write(&mut self, envelope: &Envelope) -> Result<()> {
        match envelope.kind() {
            EventKind::Ops => tracing::debug!(
                event_id = %envelope.id(),
                timestamp = envelope.timestamp(),
                payload = %envelope.payload(),
                "ops"
            ),
            EventKind::Error => tracing::warn!(
                event_id = %envelope.id(),
                timestamp = envelope.timestamp(),
                tags = ?envelope.tags(),
                payload = %envelope.payload(),
                "request error"
            ),
            kind => tracing::info!(
                event_id = %envelope.id(),
                kind = %kind,
                timestamp = envelope.timestamp(),
                tags = ?envelope.tags(),
                payload = %envelope.payload(),
                "event"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracer"
    }
}
