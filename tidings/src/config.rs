use std::{fmt, time::Duration};

use serde::Deserialize;

use crate::{Error, EventKind, OverflowPolicy, ReporterSpec, Result};

/// Host extension points that may be subscribed to through
/// [`MonitorConfig::extensions`].
///
/// Built-in channels (`log`, `request`, `request-error`, `response`, `tail`)
/// and the `ops` kind are not extension points.
pub const EXTENSION_POINTS: &[&str] = &[
    "start",
    "stop",
    "route",
    "request-internal",
    "onRequest",
    "onPreAuth",
    "onPostAuth",
    "onPreHandler",
    "onPostHandler",
    "onPreResponse",
];

/// Which host channel produces [`EventKind::Response`] envelopes.
///
/// Exactly one is active per monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseEvent {
    /// The host's `response` channel, fired when the response is sent.
    Response,
    /// The host's `tail` channel, fired after all request tails complete.
    #[default]
    Tail,
}

impl ResponseEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            ResponseEvent::Response => "response",
            ResponseEvent::Tail => "tail",
        }
    }

    /// Parse a configured selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for anything other than `response` or `tail`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "response" => Ok(ResponseEvent::Response),
            "tail" => Ok(ResponseEvent::Tail),
            _ => Err(Error::config(
                "\"responseEvent\" must be one of [response, tail]",
            )),
        }
    }
}

impl fmt::Display for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel())
    }
}

/// Ops sampling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OpsConfig {
    /// Sampling period, in milliseconds when deserialized.
    #[serde(with = "millis")]
    pub interval: Duration,
}

/// Monitor configuration.
///
/// Build it in code with the `with_*` methods, or deserialize it from the
/// JSON-shaped options a host passes at registration:
///
/// ```rust
/// use tidings::MonitorConfig;
///
/// let config: MonitorConfig = serde_json::from_value(serde_json::json!({
///     "responseEvent": "response",
///     "ops": { "interval": 2000 },
///     "reporters": [
///         { "reporter": "recorder", "events": { "response": "*" }, "path": "events.jsonl" }
///     ],
///     "extensions": ["start"]
/// }))
/// .unwrap();
///
/// assert_eq!(config.reporters().len(), 1);
/// ```
///
/// Nothing is checked at construction time. [`validate`](Self::validate) runs
/// at the start of [`Monitor::start`](crate::Monitor::start) and rejects the
/// whole configuration before any subscription is made.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Host channel selector for response envelopes. Default: `tail`.
    pub response_event: String,

    /// Ops sampling; `None` disables the sampler. Default: `None`.
    pub ops: Option<OpsConfig>,

    /// Reporters in dispatch order. Default: none.
    pub reporters: Vec<ReporterSpec>,

    /// Host extension events to collect. Default: none.
    pub extensions: Vec<String>,

    /// Mailbox capacity of each reporter under a bounded
    /// [`OverflowPolicy`]. Ignored by [`OverflowPolicy::Unbounded`].
    /// Default: 256
    pub mailbox_capacity: usize,

    /// How reporter mailboxes behave when a sink falls behind.
    /// Default: [`OverflowPolicy::Unbounded`]
    pub overflow_policy: OverflowPolicy,

    /// How long `stop()` waits for reporters to drain before aborting them.
    /// Default: 5s
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            response_event: ResponseEvent::default().channel().to_string(),
            ops: None,
            reporters: Vec::new(),
            extensions: Vec::new(),
            mailbox_capacity: 256,
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// The statically checked part of a [`MonitorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub response_event: ResponseEvent,
    pub extensions: Vec<EventKind>,
    pub ops_interval: Option<Duration>,
}

impl MonitorConfig {
    /// Select the host channel for response envelopes (`response` or `tail`).
    pub fn with_response_event(mut self, channel: impl Into<String>) -> Self {
        self.response_event = channel.into();
        self
    }

    /// Enable ops sampling at the given interval.
    pub fn with_ops_interval(mut self, interval: Duration) -> Self {
        self.ops = Some(OpsConfig { interval });
        self
    }

    /// Append a reporter. Reporters receive envelopes in the order added.
    pub fn with_reporter(mut self, reporter: impl Into<ReporterSpec>) -> Self {
        self.reporters.push(reporter.into());
        self
    }

    /// Subscribe to a host extension event.
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn reporters(&self) -> &[ReporterSpec] {
        &self.reporters
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity.max(1)
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Check everything that can be checked without constructing reporters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the response selector is not `response`
    /// or `tail`, if an extension is not in [`EXTENSION_POINTS`] or is listed
    /// twice, or if the ops interval is zero.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let response_event = ResponseEvent::parse(&self.response_event)?;

        let mut extensions: Vec<EventKind> = Vec::with_capacity(self.extensions.len());
        for (position, name) in self.extensions.iter().enumerate() {
            if !EXTENSION_POINTS.contains(&name.as_str()) {
                return Err(Error::config(format!(
                    "invalid extension event \"{name}\" at position {position}"
                )));
            }
            let kind = EventKind::extension(name);
            if extensions.contains(&kind) {
                return Err(Error::config(format!(
                    "duplicate extension event \"{name}\" at position {position}"
                )));
            }
            extensions.push(kind);
        }

        let ops_interval = match self.ops {
            Some(OpsConfig { interval }) if interval.is_zero() => {
                return Err(Error::config("\"ops.interval\" must be a positive duration"));
            }
            Some(OpsConfig { interval }) => Some(interval),
            None => None,
        };

        Ok(ValidatedConfig {
            response_event,
            extensions,
            ops_interval,
        })
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("response_event", &self.response_event)
            .field("ops", &self.ops)
            .field("reporters", &self.reporters)
            .field("extensions", &self.extensions)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("overflow_policy", &self.overflow_policy)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let validated = MonitorConfig::default().validate().unwrap();
        assert_eq!(validated.response_event, ResponseEvent::Tail);
        assert!(validated.extensions.is_empty());
        assert_eq!(validated.ops_interval, None);
    }

    #[test]
    fn rejects_unknown_response_event() {
        let err = MonitorConfig::default()
            .with_response_event("fobar")
            .validate()
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("must be one of [response, tail]"));
    }

    #[test]
    fn rejects_extension_outside_allow_list() {
        let err = MonitorConfig::default()
            .with_extension("tail")
            .validate()
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("invalid extension event \"tail\""));
    }

    #[test]
    fn rejects_duplicate_extension() {
        let err = MonitorConfig::default()
            .with_extension("start")
            .with_extension("start")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate extension"));
    }

    #[test]
    fn rejects_zero_ops_interval() {
        let err = MonitorConfig::default()
            .with_ops_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn deserializes_camel_case_options() {
        let config: MonitorConfig = serde_json::from_value(json!({
            "responseEvent": "response",
            "ops": { "interval": 2000 },
            "extensions": ["start", "route"],
            "overflowPolicy": "block",
            "shutdownTimeout": 250
        }))
        .unwrap();

        let validated = config.validate().unwrap();
        assert_eq!(validated.response_event, ResponseEvent::Response);
        assert_eq!(validated.ops_interval, Some(Duration::from_secs(2)));
        assert_eq!(validated.extensions.len(), 2);
        assert!(config.overflow_policy().is_block());
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(250));
        assert_eq!(config.mailbox_capacity(), 256);
    }

    #[test]
    fn default_policy_is_lossless() {
        assert!(MonitorConfig::default().overflow_policy().is_unbounded());
    }
}
