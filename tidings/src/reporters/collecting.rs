use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{Envelope, EventKind, Result, Sink};

/// A reporter that keeps every envelope in memory.
///
/// Clones share the same buffer: hand one clone to the monitor and keep
/// another to query from any thread.
///
/// ```rust
/// use tidings::{Filter, MonitorConfig, ReporterSpec, reporters::Collecting};
///
/// let collected = Collecting::new();
/// let config = MonitorConfig::default()
///     .with_reporter(ReporterSpec::instance(collected.clone(), Filter::new().all("ops")));
///
/// // Later:
/// assert!(collected.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct Collecting {
    inner: Arc<Mutex<Vec<Arc<Envelope>>>>,
}

impl Collecting {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Envelope>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of everything received so far, in arrival order.
    pub fn envelopes(&self) -> Vec<Arc<Envelope>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of received envelopes of the given kind.
    pub fn count_of(&self, kind: &EventKind) -> usize {
        self.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Sink for Collecting {
    async fn write(&mut self, envelope: &Envelope) -> Result<()> {
        self.lock().push(Arc::new(envelope.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

impl fmt::Debug for Collecting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collecting")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn clones_share_the_buffer() {
        let collected = Collecting::new();
        let mut sink = collected.clone();

        sink.write(&Envelope::new(EventKind::Ops, json!({}))).await.unwrap();
        sink.write(&Envelope::new(EventKind::Log, json!({}))).await.unwrap();
        sink.write(&Envelope::new(EventKind::Ops, json!({}))).await.unwrap();

        assert_eq!(collected.len(), 3);
        assert_eq!(collected.count_of(&EventKind::Ops), 2);
        assert_eq!(collected.envelopes()[1].kind(), &EventKind::Log);

        collected.clear();
        assert!(sink.is_empty());
    }
}
