use std::{borrow::Cow, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Classifies an [`Envelope`](crate::Envelope) for routing.
///
/// Built-in kinds are a closed set so that matching on them is exhaustive.
/// Host-specific channels enter through [`EventKind::Extension`], and only
/// for names listed in [`EXTENSION_POINTS`](crate::EXTENSION_POINTS).
///
/// Every kind has a stable label used in filters, logs and topology exports:
///
/// | Kind | Label |
/// |------|-------|
/// | `Request` | `request` |
/// | `Response` | `response` |
/// | `Log` | `log` |
/// | `Error` | `error` |
/// | `Ops` | `ops` |
/// | `Extension(name)` | `name` |
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Request-scoped log entries.
    Request,
    /// A completed request, sourced from either the `response` or the `tail` channel.
    Response,
    /// Server-level log entries.
    Log,
    /// Internal request errors.
    Error,
    /// Periodic process metrics.
    Ops,
    /// A host extension point, e.g. `start` or `route`.
    Extension(Arc<str>),
}

impl EventKind {
    /// Returns the label of this kind.
    pub fn label(&self) -> Cow<'static, str> {
        match self {
            EventKind::Request => Cow::Borrowed("request"),
            EventKind::Response => Cow::Borrowed("response"),
            EventKind::Log => Cow::Borrowed("log"),
            EventKind::Error => Cow::Borrowed("error"),
            EventKind::Ops => Cow::Borrowed("ops"),
            EventKind::Extension(name) => Cow::Owned(name.to_string()),
        }
    }

    pub fn extension(name: &str) -> Self {
        EventKind::Extension(Arc::from(name))
    }

    pub fn is_extension(&self) -> bool {
        matches!(self, EventKind::Extension(_))
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    /// Never fails: unknown labels become [`EventKind::Extension`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "request" => EventKind::Request,
            "response" => EventKind::Response,
            "log" => EventKind::Log,
            "error" => EventKind::Error,
            "ops" => EventKind::Ops,
            other => EventKind::extension(other),
        })
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(EventKind::from(label.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_labels_round_trip() {
        for kind in [
            EventKind::Request,
            EventKind::Response,
            EventKind::Log,
            EventKind::Error,
            EventKind::Ops,
        ] {
            assert_eq!(EventKind::from(kind.label().as_ref()), kind);
            assert!(!kind.is_extension());
        }
    }

    #[test]
    fn unknown_label_is_extension() {
        let kind = EventKind::from("route");
        assert_eq!(kind, EventKind::extension("route"));
        assert!(kind.is_extension());
        assert_eq!(kind.to_string(), "route");
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&EventKind::Ops).unwrap();
        assert_eq!(json, "\"ops\"");
        let back: EventKind = serde_json::from_str("\"start\"").unwrap();
        assert_eq!(back, EventKind::extension("start"));
    }
}
