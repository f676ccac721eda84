use std::fmt;

/// Controls how a reporter's mailbox behaves when its sink falls behind.
///
/// Envelopes flow through two stages: the collector and the ops sampler push
/// into the monitor's stream (stage 1, always unbounded so host handlers never
/// wait), and the dispatcher copies each envelope into the mailbox of every
/// matching reporter (stage 2). Overflow policy governs stage 2.
///
/// | Policy | Mailbox | When the sink falls behind | Use case |
/// |--------|---------|----------------------------|----------|
/// | [`Unbounded`](Self::Unbounded) | unbounded | Envelopes queue up | Default: nothing is lost, nobody waits |
/// | [`DropOldest`](Self::DropOldest) | bounded ring | The oldest queued envelope is evicted | Long-running sinks where memory must stay flat |
/// | [`Block`](Self::Block) | bounded | The dispatcher waits for space | Memory must stay flat and every event must arrive |
///
/// # Single-dispatcher limitation
///
/// `Block` on one reporter delays dispatch to every other reporter while the
/// dispatcher waits. Host events keep queueing in stage 1 meanwhile.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Never drop, never wait.
    #[default]
    Unbounded,

    /// Keep at most `mailbox_capacity` envelopes (rounded up to a power of
    /// two), evicting the oldest.
    ///
    /// Evictions are logged and counted in
    /// [`ReporterStats::dropped`](crate::ReporterStats::dropped).
    DropOldest,

    /// Wait for space in the reporter's mailbox.
    ///
    /// Multiple blocked reporters are awaited concurrently.
    Block,
}

impl OverflowPolicy {
    /// Returns `true` if this is the [`Unbounded`](Self::Unbounded) policy.
    pub fn is_unbounded(&self) -> bool {
        matches!(self, OverflowPolicy::Unbounded)
    }

    /// Returns `true` if this is the [`DropOldest`](Self::DropOldest) policy.
    pub fn is_drop_oldest(&self) -> bool {
        matches!(self, OverflowPolicy::DropOldest)
    }

    /// Returns `true` if this is the [`Block`](Self::Block) policy.
    pub fn is_block(&self) -> bool {
        matches!(self, OverflowPolicy::Block)
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Unbounded => write!(f, "unbounded"),
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::Block => write!(f, "block"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_never_loses_events() {
        assert!(OverflowPolicy::default().is_unbounded());
    }

    #[test]
    fn parses_kebab_case() {
        let policy: OverflowPolicy = serde_json::from_str("\"drop-oldest\"").unwrap();
        assert!(policy.is_drop_oldest());
        assert_eq!(policy.to_string(), "drop-oldest");
        assert!(serde_json::from_str::<OverflowPolicy>("\"drop\"").is_err());
    }
}
