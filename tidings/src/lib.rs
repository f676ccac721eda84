#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Tidings
//!
//! An in-process telemetry aggregator for Tokio applications.
//!
//! Tidings subscribes to a host application's event channels (server logs,
//! request logs, request errors, responses, and opt-in extension points),
//! samples process metrics on a fixed interval, normalizes everything into
//! [`Envelope`]s and delivers each one to the reporters whose [`Filter`]
//! accepts it. Reporters run in their own tasks, so a slow or failing reporter
//! never holds up the host or the other reporters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use serde_json::json;
//! use tidings::{reporters::Tracer, *};
//!
//! #[tokio::main]
//! async fn main() -> Result {
//!     let bus = EventBus::new();
//!
//!     let config = MonitorConfig::default()
//!         .with_response_event("response")
//!         .with_ops_interval(Duration::from_secs(15))
//!         .with_reporter(ReporterSpec::instance(
//!             Tracer,
//!             Filter::new().all("response").all("ops").tagged("log", ["error"]),
//!         ));
//!
//!     let mut monitor = Monitor::new(Arc::new(bus.clone()), config);
//!     monitor.start().await?;
//!
//!     bus.emit("response", json!({ "path": "/", "statusCode": 200 }));
//!     bus.emit_tagged("log", json!("disk almost full"), ["error"]);
//!
//!     monitor.stop().await
//! }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Monitor`] | Owns collection, sampling and delivery; `start` / `stop` |
//! | [`Envelope`] | One normalized event: id, kind, timestamp, payload, tags |
//! | [`EventKind`] | Routing key: `request`, `response`, `log`, `error`, `ops`, or an extension |
//! | [`Filter`] | Per-reporter map from event kind to [`Match`] expression |
//! | [`Sink`] | Trait implemented by every reporter |
//! | [`Host`] | The application's event system, as seen by the collector |
//! | [`EventBus`] | In-process [`Host`] implementation |
//! | [`MonitorConfig`] | Configuration, buildable in code or deserialized from JSON |
//! | [`Registration`] | Start-on-register ownership wrapper around a [`Monitor`] |
//! | [`OverflowPolicy`] | Controls how a reporter's mailbox behaves when its sink falls behind |
//!
//! ## Reporters
//!
//! A reporter is a [`Sink`] plus a [`Filter`]. It is either passed as an
//! instance ([`ReporterSpec::instance`]) or described by name and built when
//! the monitor starts ([`ReporterDescriptor`]), with names resolved through a
//! [`Resolver`] such as [`FactoryTable`]:
//!
//! ```rust
//! use tidings::{FactoryTable, MonitorConfig, ReporterDescriptor, Reporter, factory, reporters::Tracer};
//! use serde_json::json;
//!
//! let mut table = FactoryTable::with_builtins();
//! table.register("audit", factory(|_args| Ok(Reporter::new(Tracer))));
//!
//! let config = MonitorConfig::default()
//!     .with_reporter(ReporterDescriptor::named("audit", json!({ "request": ["auth"] })));
//! ```
//!
//! See [`reporters`] for the built-in reporters.
//!
//! ## Flow Control
//!
//! Events pass through two channel stages:
//!
//! 1. **Stage 1** (host and sampler to dispatcher) - one unbounded stream;
//!    host handlers never wait and nothing is dropped
//! 2. **Stage 2** (dispatcher to reporter) - one mailbox per reporter,
//!    shaped by [`OverflowPolicy`]: unbounded by default, or an opt-in
//!    bounded mailbox that drops the oldest envelope or makes the
//!    dispatcher wait
//!
//! The policy and the bounded capacity are set on [`MonitorConfig`].

mod collector;
mod config;
mod envelope;
mod error;
mod event_kind;
mod filter;
mod host;
mod monitor;
mod monitor_state;
mod ops;
mod overflow_policy;
mod registration;
mod registry;
mod reporter_id;
mod sink;

mod internal;

pub mod reporters;

pub use collector::{EventCollector, LOG_CHANNEL, REQUEST_CHANNEL, REQUEST_ERROR_CHANNEL};
pub use config::{EXTENSION_POINTS, MonitorConfig, OpsConfig, ResponseEvent, ValidatedConfig};
pub use envelope::{Envelope, EventId};
pub use error::Error;
pub use event_kind::EventKind;
pub use filter::{Filter, Match};
pub use host::{EventBus, Handler, Host, SubscriptionId};
pub use monitor::{Monitor, ReporterInfo, ReporterStats};
pub use monitor_state::MonitorState;
pub use ops::{
    HostMetrics, LoadMetrics, MetricsSource, OpsSampler, OpsSnapshot, ProcessMetrics,
    SchedulerMetrics, SystemMetrics, SystemSample,
};
pub use overflow_policy::OverflowPolicy;
pub use registration::Registration;
pub use registry::{
    Constructible, FactoryTable, ReporterArgs, ReporterDescriptor, ReporterEntry, ReporterFactory,
    ReporterSpec, Resolver, build_reporters, factory,
};
pub use reporter_id::ReporterId;
pub use sink::{Reporter, Sink};

/// Convenience alias for `Result<T, tidings::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
