use std::fmt;

use serde::Serialize;

/// Lifecycle state of a [`Monitor`](crate::Monitor).
///
/// ```text
/// Stopped --start()--> Starting --> Running --stop()--> Stopping --> Stopped
/// ```
///
/// `Starting` and `Stopping` are only observable if a `start()` or `stop()`
/// future is dropped before it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl MonitorState {
    pub fn is_running(&self) -> bool {
        matches!(self, MonitorState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, MonitorState::Stopped)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonitorState::Stopped => "stopped",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::Stopping => "stopping",
        })
    }
}
