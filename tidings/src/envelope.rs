use std::{fmt, hash, time::SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EventKind;

/// Unique identifier of one envelope (UUID v4, not monotonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, hash::Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        EventId::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit carried through every tidings channel.
///
/// The collector and the ops sampler wrap each raw host payload into an
/// envelope, and from that point on it travels as `Arc<Envelope>` through the
/// internal stream and into each matching reporter's mailbox. Envelopes are
/// immutable: there are no setters, only the `with_*` builders used before the
/// envelope is shared.
///
/// - `id`: unique event identifier.
/// - `kind`: routing key matched against reporter filters.
/// - `timestamp`: creation time in nanoseconds since Unix epoch.
/// - `payload`: opaque JSON data, shaped by `kind`.
/// - `tags`: labels supplied by the host, used by tag match expressions.
#[derive(Clone, Serialize, Deserialize)]
pub struct Envelope {
    id: EventId,
    kind: EventKind,
    timestamp: u64,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

impl Envelope {
    /// Create a new envelope stamped with the current wall-clock time.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            kind,
            timestamp: now_nanos(),
            payload,
            tags: Vec::new(),
        }
    }

    /// Attach tags, replacing any previously set.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Override the timestamp. Useful for replaying recorded events in tests.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Timestamp in nanoseconds since Unix epoch (u64 truncation).
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns a reference to the event payload.
    ///
    /// ```ignore
    /// if envelope.kind() == &EventKind::Response {
    ///     let status = envelope.payload()["statusCode"].as_u64();
    /// }
    /// ```
    #[inline]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns `true` if the envelope carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Envelope {}

impl hash::Hash for Envelope {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .field("tags", &self.tags)
            .field("payload", &self.payload)
            .finish()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ id: {}, kind: {}, timestamp: {} }}",
            self.id, self.kind, self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_debug() {
        let envelope = Envelope::new(EventKind::Log, json!({ "data": "hello" }))
            .with_tags(["server", "info"]);
        let debug_str = format!("{:?}", envelope);

        assert!(debug_str.contains("Log"));
        assert!(debug_str.contains("hello"));
        assert!(debug_str.contains("server"));
    }

    #[test]
    fn tags_are_queryable() {
        let envelope = Envelope::new(EventKind::Request, json!(null)).with_tags(["db"]);
        assert!(envelope.has_tag("db"));
        assert!(!envelope.has_tag("cache"));
    }

    #[test]
    fn timestamps_are_set() {
        let envelope = Envelope::new(EventKind::Ops, json!({}));
        assert!(envelope.timestamp() > 0);
        assert_eq!(envelope.with_timestamp(7).timestamp(), 7);
    }

    #[test]
    fn serializes_kind_as_label() {
        let envelope = Envelope::new(EventKind::Response, json!({ "statusCode": 200 }));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "response");
        assert_eq!(value["payload"]["statusCode"], 200);
        assert!(value.get("tags").is_none());
    }
}
