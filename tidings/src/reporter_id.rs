use std::{hash::Hash, sync::Arc};

/// Identifier of one reporter entry inside a running monitor.
///
/// Assigned at registry build time from the reporter's name (or the
/// `reporter` string of a descriptor) plus its position in the configured
/// list, e.g. `recorder#1`. Positions make ids unique even when the same
/// reporter type is configured twice.
///
/// `ReporterId` is cheap to clone and shows up as the `reporter` field in
/// every log line the monitor emits about a sink.
#[derive(Debug, Clone, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct ReporterId(Arc<str>);

impl ReporterId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub(crate) fn indexed(name: &str, index: usize) -> Self {
        Self(Arc::from(format!("{name}#{index}")))
    }

    /// Returns the string representation of this reporter ID.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ReporterId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ReporterId {}

impl std::fmt::Display for ReporterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Hash for ReporterId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<&str> for ReporterId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_ids_are_distinct() {
        let a = ReporterId::indexed("recorder", 0);
        let b = ReporterId::indexed("recorder", 1);
        assert_eq!(a.as_str(), "recorder#0");
        assert_ne!(a, b);
        assert_eq!(a, ReporterId::from("recorder#0"));
    }
}
