use std::sync::Arc;

use crate::{Host, Monitor, MonitorConfig, Resolver, Result};

/// A monitor attached to a host for the lifetime of the registration.
///
/// [`register`](Self::register) is the one-call way to wire telemetry into
/// an application: it validates the configuration, builds the reporters and
/// starts collecting before it returns. [`shutdown`](Self::shutdown) consumes
/// the registration, so a monitor cannot be used after it was torn down.
///
/// ```rust
/// use std::sync::Arc;
/// use tidings::{EventBus, FactoryTable, MonitorConfig, Registration};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tidings::Result {
/// let bus = EventBus::new();
/// let config: MonitorConfig = serde_json::from_value(serde_json::json!({
///     "responseEvent": "response",
///     "reporters": [{ "reporter": "tracer", "events": { "response": "*" } }]
/// }))?;
///
/// let registration = Registration::register(Arc::new(bus), config, FactoryTable::with_builtins()).await?;
/// assert!(registration.monitor().state().is_running());
/// registration.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Registration {
    monitor: Monitor,
}

impl Registration {
    /// Create a monitor for `host` and start it.
    ///
    /// # Errors
    ///
    /// Propagates any error of [`Monitor::start`]. Nothing stays subscribed
    /// on the host when registration fails.
    pub async fn register(
        host: Arc<dyn Host>,
        config: MonitorConfig,
        resolver: impl Resolver + 'static,
    ) -> Result<Self> {
        let mut monitor = Monitor::new(host, config).with_resolver(resolver);
        monitor.start().await?;
        Ok(Self { monitor })
    }

    /// Start an already configured monitor, e.g. one with a custom
    /// [`MetricsSource`](crate::MetricsSource).
    ///
    /// # Errors
    ///
    /// Propagates any error of [`Monitor::start`].
    pub async fn attach(mut monitor: Monitor) -> Result<Self> {
        monitor.start().await?;
        Ok(Self { monitor })
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Stop the monitor and release the host.
    ///
    /// # Errors
    ///
    /// Propagates any error of [`Monitor::stop`].
    pub async fn shutdown(mut self) -> Result<()> {
        self.monitor.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, EventBus, FactoryTable};
    use serde_json::json;

    #[tokio::test]
    async fn invalid_response_event_leaves_no_listeners() {
        let bus = EventBus::new();
        let config = MonitorConfig::default().with_response_event("fobar");
        let err = Registration::register(Arc::new(bus.clone()), config, FactoryTable::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::config("\"responseEvent\" must be one of [response, tail]")
        );
        assert_eq!(bus.total_listeners(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_the_host() {
        let bus = EventBus::new();
        let config: MonitorConfig = serde_json::from_value(json!({
            "reporters": [{ "reporter": "collecting", "events": { "log": "*" } }]
        }))
        .unwrap();
        let registration =
            Registration::register(Arc::new(bus.clone()), config, FactoryTable::with_builtins())
                .await
                .unwrap();
        assert_eq!(registration.monitor().reporter_count(), 1);
        assert_eq!(bus.listener_count("tail"), 1);

        registration.shutdown().await.unwrap();
        assert_eq!(bus.total_listeners(), 0);
    }
}
