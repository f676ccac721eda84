use std::sync::Arc;

use crate::ReporterId;

/// The single error type for all tidings operations.
///
/// Every fallible API returns `tidings::Result<T>` (alias for
/// `Result<T, tidings::Error>`). Static configuration problems surface as
/// [`Error::Config`] before any subscription is made; reporter resolution and
/// construction failures abort `start()` as a whole; sink write failures are
/// recovered inside the monitor and only ever observed through logs and
/// [`Sink::on_error`](crate::Sink::on_error).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid monitor configuration: {0}")]
    Config(String),

    #[error("Reporter '{0}' could not be resolved")]
    ReporterResolution(String),

    #[error("Reporter '{reporter}' failed to construct: {source}")]
    ReporterConstruction {
        reporter: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("Reporter '{reporter}' failed to write: {source}")]
    SinkWrite {
        reporter: ReporterId,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Monitor has already started.")]
    AlreadyStarted,

    #[error("External error: {0}")]
    External(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    IoError(#[source] Arc<std::io::Error>),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Error::Lifecycle(msg.into())
    }

    pub fn external(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::External(Arc::new(e))
    }

    pub(crate) fn construction(
        reporter: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::ReporterConstruction {
            reporter: reporter.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn sink_write(
        reporter: &ReporterId,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::SinkWrite {
            reporter: reporter.clone(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` for [`Error::Config`].
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Config(a), Self::Config(b)) => a == b,
            (Self::ReporterResolution(a), Self::ReporterResolution(b)) => a == b,
            (Self::Lifecycle(a), Self::Lifecycle(b)) => a == b,
            (Self::AlreadyStarted, Self::AlreadyStarted) => true,
            (
                Self::ReporterConstruction {
                    reporter: a,
                    source: sa,
                },
                Self::ReporterConstruction {
                    reporter: b,
                    source: sb,
                },
            ) => a == b && Arc::ptr_eq(sa, sb),
            (
                Self::SinkWrite {
                    reporter: a,
                    source: sa,
                },
                Self::SinkWrite {
                    reporter: b,
                    source: sb,
                },
            ) => a == b && Arc::ptr_eq(sa, sb),
            (Self::External(a), Self::External(b)) => Arc::ptr_eq(a, b),
            (Self::IoError(a), Self::IoError(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::External(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_compare_by_message() {
        assert_eq!(Error::config("bad"), Error::config("bad"));
        assert_ne!(Error::config("bad"), Error::config("worse"));
        assert!(Error::config("bad").is_config());
        assert!(!Error::AlreadyStarted.is_config());
    }

    #[test]
    fn construction_error_names_reporter() {
        let err = Error::construction("file", Error::config("missing path"));
        let msg = err.to_string();
        assert!(msg.contains("'file'"));
        assert!(msg.contains("missing path"));
    }
}
