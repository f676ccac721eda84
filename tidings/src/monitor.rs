use std::{fmt, sync::Arc};

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    Error, EventCollector, FactoryTable, Filter, Host, MetricsSource, MonitorConfig, MonitorState,
    OpsSampler, ReporterEntry, ReporterId, ReporterSpec, Resolver, Result, Sink, SystemMetrics,
    build_reporters,
    internal::{Counters, Dispatcher, Route, Worker, mailbox},
};

/// Delivery counters of one reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReporterStats {
    /// Envelopes the sink accepted.
    pub written: u64,
    /// Writes that returned an error or panicked.
    pub failed: u64,
    /// Envelopes evicted from a full [`DropOldest`](crate::OverflowPolicy::DropOldest) mailbox.
    pub dropped: u64,
    /// The reporter no longer receives envelopes.
    pub retired: bool,
}

/// A running reporter and the event kinds it subscribes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReporterInfo {
    pub id: ReporterId,
    pub subscriptions: Vec<String>,
    pub stats: ReporterStats,
}

struct Installed {
    id: ReporterId,
    subscriptions: Vec<String>,
    counters: Arc<Counters>,
}

/// Collects host events and ops samples and delivers them to reporters.
///
/// # Lifecycle
///
/// - [`start()`](Self::start) validates the configuration, builds every
///   reporter, spawns the delivery tasks, subscribes to the host and starts
///   the ops sampler. It resolves only once all of that is in place.
/// - [`stop()`](Self::stop) stops the sampler, unsubscribes from the host,
///   delivers whatever was already collected, and waits for reporters to
///   finish within the configured shutdown timeout.
///
/// `start()` on a running monitor and `stop()` on a stopped one are no-ops.
/// Reporters are consumed by the first successful `start()`; a stopped
/// monitor cannot be started again.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use tidings::{EventBus, Filter, Monitor, MonitorConfig, ReporterSpec, reporters::Collecting};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tidings::Result {
/// let bus = EventBus::new();
/// let collected = Collecting::new();
/// let config = MonitorConfig::default()
///     .with_reporter(ReporterSpec::instance(collected.clone(), Filter::new().all("log")));
///
/// let mut monitor = Monitor::new(Arc::new(bus.clone()), config);
/// monitor.start().await?;
/// bus.emit("log", json!({ "data": "hello" }));
/// monitor.stop().await?;
///
/// assert_eq!(collected.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Monitor {
    host: Arc<dyn Host>,
    config: MonitorConfig,
    resolver: Arc<dyn Resolver>,
    state: MonitorState,
    consumed: bool,
    installed: Vec<Installed>,
    collector: Option<EventCollector>,
    sampler: OpsSampler,
    cancel_token: CancellationToken,
    tasks: JoinSet<()>,
}

impl Monitor {
    /// Create a stopped monitor. Nothing is validated until
    /// [`start()`](Self::start).
    ///
    /// Named reporters resolve through [`FactoryTable::with_builtins`] unless
    /// [`with_resolver`](Self::with_resolver) is used.
    pub fn new(host: Arc<dyn Host>, config: MonitorConfig) -> Self {
        let sampler = OpsSampler::new(Box::new(SystemMetrics::new()), host.clone());
        Self {
            host,
            config,
            resolver: Arc::new(FactoryTable::with_builtins()),
            state: MonitorState::Stopped,
            consumed: false,
            installed: Vec::new(),
            collector: None,
            sampler,
            cancel_token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Resolve named reporters through `resolver`.
    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Read ops figures from `source` instead of the operating system.
    pub fn with_metrics_source(mut self, source: impl MetricsSource) -> Self {
        self.sampler = OpsSampler::new(Box::new(source), self.host.clone());
        self
    }

    /// Add a reporter before the monitor is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] unless the monitor is stopped and has
    /// never been started.
    pub fn add_reporter(&mut self, sink: impl Sink, filter: Filter) -> Result<()> {
        if !self.state.is_stopped() || self.consumed {
            return Err(Error::AlreadyStarted);
        }
        self.config.reporters.push(ReporterSpec::instance(sink, filter));
        Ok(())
    }

    /// Validate the configuration and begin collecting.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] - invalid configuration; nothing was subscribed
    /// - [`Error::ReporterResolution`] / [`Error::ReporterConstruction`] - a
    ///   reporter could not be built; nothing was subscribed
    /// - any error of [`Host::subscribe`]; subscriptions already made are
    ///   rolled back
    /// - [`Error::Lifecycle`] - the monitor was started before
    ///
    /// On error the monitor is left [`Stopped`](MonitorState::Stopped).
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            MonitorState::Running => return Ok(()),
            MonitorState::Starting | MonitorState::Stopping => {
                return Err(Error::lifecycle(format!(
                    "cannot start a monitor while it is {}",
                    self.state
                )));
            }
            MonitorState::Stopped => {}
        }

        let validated = self.config.validate()?;
        if self.consumed {
            return Err(Error::lifecycle("monitor cannot be restarted after stop"));
        }

        self.state = MonitorState::Starting;
        self.consumed = true;
        let specs = std::mem::take(&mut self.config.reporters);
        let entries = match build_reporters(specs, self.resolver.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                self.state = MonitorState::Stopped;
                return Err(e);
            }
        };

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        self.cancel_token = CancellationToken::new();
        let routes = self.spawn_workers(entries);
        let dispatcher = Dispatcher::new(stream_rx, routes, self.cancel_token.clone());
        self.tasks.spawn(dispatcher.run());

        let mut collector = EventCollector::new(self.host.clone(), &validated);
        if let Err(e) = collector.start(stream_tx.clone()).await {
            self.teardown().await;
            return Err(e);
        }
        self.collector = Some(collector);

        if let Some(interval) = validated.ops_interval {
            if let Err(e) = self.sampler.start(interval, stream_tx) {
                self.teardown().await;
                return Err(e);
            }
        }

        self.state = MonitorState::Running;
        tracing::info!(
            reporters = self.installed.len(),
            response_event = %validated.response_event.channel(),
            ops_interval_ms = validated.ops_interval.map(|i| i.as_millis() as u64),
            "monitor started"
        );
        Ok(())
    }

    fn spawn_workers(&mut self, entries: Vec<ReporterEntry>) -> Vec<Route> {
        let mut routes = Vec::with_capacity(entries.len());
        for ReporterEntry {
            id,
            reporter,
            filter,
        } in entries
        {
            let (tx, rx) = mailbox(self.config.overflow_policy(), self.config.mailbox_capacity());
            let counters = Arc::new(Counters::default());
            self.installed.push(Installed {
                id: id.clone(),
                subscriptions: filter
                    .subscriptions()
                    .iter()
                    .map(|k| k.label().into_owned())
                    .collect(),
                counters: counters.clone(),
            });
            self.tasks
                .spawn(Worker::new(id.clone(), reporter, rx, counters.clone()).run());
            routes.push(Route {
                id,
                filter,
                sender: tx,
                counters,
            });
        }
        routes
    }

    /// Stop collecting, deliver what was already collected, and wait for
    /// reporters to finish.
    ///
    /// Reporters still busy after
    /// [`shutdown_timeout`](MonitorConfig::shutdown_timeout) are aborted.
    /// The monitor always ends up [`Stopped`](MonitorState::Stopped).
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Host::unsubscribe`], after the shutdown
    /// has otherwise completed.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state.is_stopped() {
            return Ok(());
        }
        self.state = MonitorState::Stopping;
        let result = self.teardown().await;
        tracing::info!(reporters = self.installed.len(), "monitor stopped");
        result
    }

    async fn teardown(&mut self) -> Result<()> {
        self.sampler.stop().await;
        let result = match self.collector.take() {
            Some(mut collector) => collector.stop().await,
            None => Ok(()),
        };
        self.cancel_token.cancel();

        let timeout = self.config.shutdown_timeout();
        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    tracing::error!(error = %e, "monitor task failed");
                }
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                pending = self.tasks.len(),
                "reporters did not finish in time, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.state = MonitorState::Stopped;
        result
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Number of installed reporters. Zero until the monitor has started.
    pub fn reporter_count(&self) -> usize {
        self.installed.len()
    }

    /// Installed reporters in dispatch order, with their subscriptions and
    /// current delivery counters.
    pub fn subscriptions(&self) -> Vec<ReporterInfo> {
        self.installed
            .iter()
            .map(|r| ReporterInfo {
                id: r.id.clone(),
                subscriptions: r.subscriptions.clone(),
                stats: r.counters.snapshot(),
            })
            .collect()
    }

    /// Generate a Mermaid flowchart showing which event kinds reach which
    /// reporters.
    ///
    /// # Example output
    ///
    /// ```text
    /// flowchart LR
    ///     ops((ops)) --> r0["collecting#0"]
    ///     response((response)) --> r1["tracer#1"]
    /// ```
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["flowchart LR".to_string()];
        for (index, reporter) in self.installed.iter().enumerate() {
            for kind in &reporter.subscriptions {
                lines.push(format!(
                    "    {kind}(({kind})) --> r{index}[\"{}\"]",
                    reporter.id
                ));
            }
        }
        lines.join("\n")
    }

    /// Export installed reporters and their subscriptions as JSON.
    ///
    /// # Errors
    ///
    /// Returns any serialization error produced by `serde_json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.subscriptions())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if !self.state.is_stopped() {
            tracing::debug!(state = %self.state, "monitor dropped without stop()");
        }
        self.cancel_token.cancel();
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("state", &self.state)
            .field("reporters", &self.installed.len())
            .field("collector", &self.collector)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventBus, reporters::Collecting};
    use serde_json::json;

    fn monitor(bus: &EventBus, config: MonitorConfig) -> Monitor {
        Monitor::new(Arc::new(bus.clone()), config)
    }

    #[tokio::test]
    async fn starts_and_stops() {
        let bus = EventBus::new();
        let mut m = monitor(&bus, MonitorConfig::default());
        assert_eq!(m.state(), MonitorState::Stopped);

        m.start().await.unwrap();
        assert_eq!(m.state(), MonitorState::Running);
        assert_eq!(bus.total_listeners(), 4);

        m.start().await.unwrap();
        assert_eq!(bus.total_listeners(), 4);

        m.stop().await.unwrap();
        assert_eq!(m.state(), MonitorState::Stopped);
        assert_eq!(bus.total_listeners(), 0);
        m.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let bus = EventBus::new();
        let mut m = monitor(&bus, MonitorConfig::default());
        m.stop().await.unwrap();
        assert_eq!(m.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn cannot_restart() {
        let bus = EventBus::new();
        let mut m = monitor(&bus, MonitorConfig::default());
        m.start().await.unwrap();
        m.stop().await.unwrap();
        let err = m.start().await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle(_)));
        assert_eq!(bus.total_listeners(), 0);
    }

    #[tokio::test]
    async fn add_reporter_only_before_start() {
        let bus = EventBus::new();
        let collected = Collecting::new();
        let mut m = monitor(&bus, MonitorConfig::default());
        m.add_reporter(collected.clone(), Filter::new().all("log")).unwrap();

        m.start().await.unwrap();
        assert_eq!(
            m.add_reporter(Collecting::new(), Filter::new().all("log")),
            Err(Error::AlreadyStarted)
        );

        bus.emit("log", json!("hello"));
        m.stop().await.unwrap();
        assert_eq!(collected.len(), 1);
    }

    #[tokio::test]
    async fn topology_export() {
        let bus = EventBus::new();
        let config = MonitorConfig::default()
            .with_reporter(ReporterSpec::instance(
                Collecting::new(),
                Filter::new().all("ops").all("log"),
            ))
            .with_reporter(ReporterSpec::instance(
                Collecting::new(),
                Filter::new().all("response"),
            ));
        let mut m = monitor(&bus, config);
        m.start().await.unwrap();

        let info = m.subscriptions();
        assert_eq!(m.reporter_count(), 2);
        assert_eq!(info[0].id.as_str(), "collecting#0");
        assert_eq!(info[0].subscriptions, vec!["log", "ops"]);
        assert_eq!(info[1].subscriptions, vec!["response"]);

        let mermaid = m.to_mermaid();
        assert!(mermaid.starts_with("flowchart LR"));
        assert!(mermaid.contains("ops((ops)) --> r0[\"collecting#0\"]"));
        assert!(mermaid.contains("response((response)) --> r1[\"collecting#1\"]"));

        let parsed: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        assert_eq!(parsed[1]["id"], "collecting#1");
        assert_eq!(parsed[1]["stats"]["retired"], false);

        m.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_reporter_is_aborted_after_timeout() {
        struct Hang;

        impl Sink for Hang {
            async fn write(&mut self, _envelope: &crate::Envelope) -> Result<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let bus = EventBus::new();
        let config = MonitorConfig::default()
            .with_shutdown_timeout(std::time::Duration::from_millis(50))
            .with_reporter(ReporterSpec::instance(Hang, Filter::new().all("log")));
        let mut m = monitor(&bus, config);
        m.start().await.unwrap();
        bus.emit("log", json!("stuck"));

        m.stop().await.unwrap();
        assert_eq!(m.state(), MonitorState::Stopped);
    }
}
