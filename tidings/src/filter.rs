use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::{EXTENSION_POINTS, Envelope, Error, EventKind, Result};

/// Match expression for one event kind inside a [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// Every envelope of the kind (`"*"`).
    All,
    /// Envelopes carrying at least one of the listed tags.
    Tags(BTreeSet<String>),
}

impl Match {
    fn accepts(&self, envelope: &Envelope) -> bool {
        match self {
            Match::All => true,
            Match::Tags(tags) => envelope.tags().iter().any(|t| tags.contains(t)),
        }
    }

    fn from_json(kind: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s == "*" => Ok(Match::All),
            Value::String(s) if !s.is_empty() => Ok(Match::Tags(BTreeSet::from([s.clone()]))),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| match item {
                    Value::String(s) if !s.is_empty() => Ok(s.clone()),
                    other => Err(Error::config(format!(
                        "\"events.{kind}\" tags must be non-empty strings, got {other}"
                    ))),
                })
                .collect::<Result<BTreeSet<_>>>()
                .map(Match::Tags),
            other => Err(Error::config(format!(
                "\"events.{kind}\" must be \"*\" or a list of tags, got {other}"
            ))),
        }
    }
}

/// Per-reporter mapping from [`EventKind`] to a [`Match`] expression.
///
/// A filter decides which envelopes a reporter receives:
///
/// ```rust
/// use serde_json::json;
/// use tidings::{Envelope, EventKind, Filter};
///
/// let filter = Filter::from_json(&json!({ "response": "*", "log": ["error"] })).unwrap();
///
/// assert!(filter.matches(&Envelope::new(EventKind::Response, json!({}))));
/// assert!(filter.matches(&Envelope::new(EventKind::Log, json!({})).with_tags(["error"])));
/// assert!(!filter.matches(&Envelope::new(EventKind::Log, json!({})).with_tags(["debug"])));
/// assert!(!filter.matches(&Envelope::new(EventKind::Ops, json!({}))));
/// ```
///
/// An empty filter matches nothing, so the reporter registry rejects reporters
/// configured with one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    entries: BTreeMap<EventKind, Match>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every envelope of `kind`.
    pub fn all(mut self, kind: impl Into<EventKind>) -> Self {
        self.entries.insert(kind.into(), Match::All);
        self
    }

    /// Subscribe to envelopes of `kind` tagged with any of `tags`.
    pub fn tagged<I, S>(mut self, kind: impl Into<EventKind>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        self.entries.insert(kind.into(), Match::Tags(tags));
        self
    }

    /// Parse the `events` object of a reporter descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `value` is not an object, if a key is
    /// neither a built-in kind nor one of [`EXTENSION_POINTS`], or if any
    /// entry is neither `"*"` nor a non-empty list of tags.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Null => Ok(Self::default()),
            other => Err(Error::config(format!(
                "\"events\" must be an object, got {other}"
            ))),
        }
    }

    pub fn from_map(map: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (label, expr) in map {
            let kind = EventKind::from(label.as_str());
            if kind.is_extension() && !EXTENSION_POINTS.contains(&label.as_str()) {
                return Err(Error::config(format!("unknown event kind \"{label}\" in \"events\"")));
            }
            entries.insert(kind, Match::from_json(label, expr)?);
        }
        Ok(Self { entries })
    }

    /// Returns `true` iff the filter has an entry for the envelope's kind
    /// whose expression accepts the envelope.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.entries
            .get(envelope.kind())
            .is_some_and(|m| m.accepts(envelope))
    }

    /// Kinds this filter subscribes to, sorted.
    pub fn subscriptions(&self) -> Vec<EventKind> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, kind: &EventKind) -> Option<&Match> {
        self.entries.get(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<EventKind>> FromIterator<(K, Match)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, Match)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, m)| (k.into(), m)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: EventKind) -> Envelope {
        Envelope::new(kind, json!({}))
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert!(!filter.matches(&envelope(EventKind::Response)));
        assert!(!filter.matches(&envelope(EventKind::Ops)));
    }

    #[test]
    fn wildcard_matches_only_its_kind() {
        let filter = Filter::new().all(EventKind::Response);
        assert!(filter.matches(&envelope(EventKind::Response)));
        assert!(!filter.matches(&envelope(EventKind::Log)));
    }

    #[test]
    fn tag_expression_requires_intersection() {
        let filter = Filter::new().tagged(EventKind::Log, ["error", "db"]);
        assert!(filter.matches(&envelope(EventKind::Log).with_tags(["db", "slow"])));
        assert!(!filter.matches(&envelope(EventKind::Log).with_tags(["info"])));
        assert!(!filter.matches(&envelope(EventKind::Log)));
    }

    #[test]
    fn extension_kinds_are_matchable() {
        let filter = Filter::from_json(&json!({ "start": "*" })).unwrap();
        assert!(filter.matches(&envelope(EventKind::extension("start"))));
        assert!(!filter.matches(&envelope(EventKind::extension("stop"))));
    }

    #[test]
    fn misspelled_kind_is_rejected() {
        let err = Filter::from_json(&json!({ "respnse": "*" })).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("unknown event kind \"respnse\""));

        let err = Filter::from_json(&json!({ "tail": "*" })).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn single_string_is_one_tag() {
        let filter = Filter::from_json(&json!({ "request": "auth" })).unwrap();
        assert_eq!(
            filter.get(&EventKind::Request),
            Some(&Match::Tags(BTreeSet::from(["auth".to_string()])))
        );
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in [
            json!({ "log": 5 }),
            json!({ "log": [] }),
            json!({ "log": [1, 2] }),
            json!({ "log": "" }),
            json!(["log"]),
        ] {
            let err = Filter::from_json(&bad).unwrap_err();
            assert!(err.is_config(), "{bad} should be rejected");
        }
    }

    #[test]
    fn subscriptions_are_sorted() {
        let filter = Filter::from_json(&json!({ "ops": "*", "request": "*", "log": "*" })).unwrap();
        assert_eq!(
            filter.subscriptions(),
            vec![EventKind::Request, EventKind::Log, EventKind::Ops]
        );
    }
}
