//! Periodic process metrics.
//!
//! The [`OpsSampler`] wakes up once per configured interval, asks its
//! [`MetricsSource`] for a reading, adds what only the sampler can know
//! (how late the tick ran, how many connections the host has open) and
//! pushes the result into the monitor's stream as an [`EventKind::Ops`]
//! envelope.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tokio::{
    select,
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{Envelope, Error, EventKind, Host, Result};

/// Machine-wide figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    /// Bytes.
    pub total_memory: u64,
    /// Bytes.
    pub used_memory: u64,
    /// 1, 5 and 15 minute load averages.
    pub load_avg: [f64; 3],
    /// Seconds since boot.
    pub uptime: u64,
}

/// Figures for the current process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub pid: u32,
    /// Resident set size in bytes.
    pub memory_rss: u64,
    /// Percent of one core since the previous reading.
    pub cpu_usage: f32,
    pub uptime_secs: u64,
}

/// One reading from a [`MetricsSource`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub host: HostMetrics,
    pub process: ProcessMetrics,
}

/// Payload of every ops envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpsSnapshot {
    pub host: HostMetrics,
    pub process: ProcessMetrics,
    pub scheduler: SchedulerMetrics,
    pub load: LoadMetrics,
}

/// How late the sampling tick ran compared to its schedule.
///
/// A growing delay means the runtime is too busy to poll timers on time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub delay_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub connections: Option<u64>,
}

/// Source of host and process metrics for the ops sampler.
pub trait MetricsSource: Send + 'static {
    fn sample(&mut self) -> SystemSample;
}

/// [`MetricsSource`] reading the operating system through `sysinfo`.
pub struct SystemMetrics {
    system: System,
    pid: Option<Pid>,
}

impl SystemMetrics {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn sample(&mut self) -> SystemSample {
        self.system.refresh_memory();
        let load = System::load_average();
        let host = HostMetrics {
            total_memory: self.system.total_memory(),
            used_memory: self.system.used_memory(),
            load_avg: [load.one, load.five, load.fifteen],
            uptime: System::uptime(),
        };

        let process = self
            .pid
            .filter(|pid| self.system.refresh_process(*pid))
            .and_then(|pid| self.system.process(pid).map(|p| (pid, p)))
            .map(|(pid, p)| ProcessMetrics {
                pid: pid.as_u32(),
                memory_rss: p.memory(),
                cpu_usage: p.cpu_usage(),
                uptime_secs: p.run_time(),
            })
            .unwrap_or_default();

        SystemSample { host, process }
    }
}

impl fmt::Debug for SystemMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMetrics")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Produces one ops envelope per interval while started.
pub struct OpsSampler {
    source: Option<Box<dyn MetricsSource>>,
    host: Arc<dyn Host>,
    running: Option<(CancellationToken, JoinHandle<Box<dyn MetricsSource>>)>,
}

impl OpsSampler {
    pub fn new(source: Box<dyn MetricsSource>, host: Arc<dyn Host>) -> Self {
        Self {
            source: Some(source),
            host,
            running: None,
        }
    }

    /// Begin sampling every `interval`, sending envelopes to `sender`.
    ///
    /// The first sample is taken one full interval after this call.
    /// Calling `start` while already sampling is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is zero, and
    /// [`Error::Lifecycle`] if the metrics source was lost to a panic in a
    /// previous run.
    pub fn start(
        &mut self,
        interval: Duration,
        sender: UnboundedSender<Arc<Envelope>>,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::config("\"ops.interval\" must be a positive duration"));
        }
        if self.running.is_some() {
            return Ok(());
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| Error::lifecycle("ops metrics source is unavailable"))?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let host = self.host.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    scheduled = ticker.tick() => {
                        let delay = Instant::now().saturating_duration_since(scheduled);
                        let SystemSample { host: host_metrics, process } = source.sample();
                        let snapshot = OpsSnapshot {
                            host: host_metrics,
                            process,
                            scheduler: SchedulerMetrics {
                                delay_ms: delay.as_secs_f64() * 1000.0,
                            },
                            load: LoadMetrics {
                                connections: host.active_connections(),
                            },
                        };
                        if !emit(&sender, snapshot) {
                            break;
                        }
                    }
                }
            }
            source
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "ops sampler started");
        self.running = Some((token, handle));
        Ok(())
    }

    /// Stop sampling. After this returns no further ops envelopes are
    /// produced. Safe to call when not started.
    pub async fn stop(&mut self) {
        let Some((token, handle)) = self.running.take() else {
            return;
        };
        token.cancel();
        match handle.await {
            Ok(source) => self.source = Some(source),
            Err(e) => tracing::error!(error = %e, "ops sampler task failed"),
        }
        tracing::debug!("ops sampler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

/// Returns `false` once the stream is closed.
fn emit(sender: &UnboundedSender<Arc<Envelope>>, snapshot: OpsSnapshot) -> bool {
    let payload = match serde_json::to_value(&snapshot) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize ops snapshot");
            return true;
        }
    };
    sender
        .send(Arc::new(Envelope::new(EventKind::Ops, payload)))
        .is_ok()
}

impl Drop for OpsSampler {
    fn drop(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            token.cancel();
            handle.abort();
        }
    }
}

impl fmt::Debug for OpsSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpsSampler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventBus;
    use tokio::sync::mpsc;

    struct Fixed;

    impl MetricsSource for Fixed {
        fn sample(&mut self) -> SystemSample {
            SystemSample {
                host: HostMetrics {
                    total_memory: 1024,
                    used_memory: 512,
                    load_avg: [0.5, 0.25, 0.125],
                    uptime: 60,
                },
                process: ProcessMetrics {
                    pid: 42,
                    memory_rss: 128,
                    cpu_usage: 1.5,
                    uptime_secs: 10,
                },
            }
        }
    }

    fn sampler() -> OpsSampler {
        let bus = EventBus::new();
        bus.set_active_connections(7);
        OpsSampler::new(Box::new(Fixed), Arc::new(bus))
    }

    #[tokio::test]
    async fn zero_interval_is_a_config_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = sampler().start(Duration::ZERO, tx).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test(start_paused = true)]
    async fn one_sample_per_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sampler = sampler();
        sampler.start(Duration::from_millis(2000), tx).unwrap();

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(4002)).await;
        let mut samples = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            samples.push(envelope);
        }
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|e| e.kind() == &EventKind::Ops));

        sampler.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_carries_source_and_host_figures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sampler = sampler();
        sampler.start(Duration::from_millis(100), tx).unwrap();

        let envelope = rx.recv().await.unwrap();
        let snapshot: OpsSnapshot = serde_json::from_value(envelope.payload().clone()).unwrap();
        assert_eq!(snapshot.process.pid, 42);
        assert_eq!(snapshot.host.used_memory, 512);
        assert_eq!(snapshot.load.connections, Some(7));
        assert!(snapshot.scheduler.delay_ms >= 0.0);

        sampler.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_restartable() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sampler = sampler();
        sampler.stop().await;
        assert!(!sampler.is_running());

        sampler.start(Duration::from_secs(1), tx.clone()).unwrap();
        assert!(sampler.is_running());
        sampler.stop().await;
        sampler.stop().await;
        assert!(!sampler.is_running());

        sampler.start(Duration::from_secs(1), tx).unwrap();
        sampler.stop().await;
    }

    #[test]
    fn system_metrics_reads_something() {
        let sample = SystemMetrics::new().sample();
        assert!(sample.host.total_memory > 0);
    }
}
