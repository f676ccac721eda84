//! Ready-to-use reporters.
//!
//! # Available Reporters
//!
//! - [`Tracer`] - Logs every envelope through the `tracing` crate
//! - [`Recorder`] - Appends envelopes to a JSON Lines file
//! - [`Collecting`] - Keeps envelopes in memory for inspection
//!
//! All three are also registered by name in
//! [`FactoryTable::with_builtins`](crate::FactoryTable::with_builtins), so
//! configuration can refer to them as `"tracer"`, `"recorder"` and
//! `"collecting"`.
//!
//! # Example
//!
//! ```rust
//! use tidings::{Filter, MonitorConfig, ReporterSpec, reporters::Tracer};
//!
//! let config = MonitorConfig::default()
//!     .with_reporter(ReporterSpec::instance(Tracer, Filter::new().all("log")));
//! ```

mod collecting;
mod recorder;
mod tracer;

pub use collecting::Collecting;
pub use recorder::Recorder;
pub use tracer::Tracer;
