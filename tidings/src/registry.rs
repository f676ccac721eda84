use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{Error, Filter, Reporter, ReporterId, Result, Sink, internal::panic_message};

/// Arguments handed to a [`ReporterFactory`].
#[derive(Debug, Clone)]
pub struct ReporterArgs {
    /// The reporter's parsed `events` filter.
    pub filter: Filter,
    /// Every descriptor field other than `reporter` and `events`.
    pub config: Map<String, Value>,
}

impl ReporterArgs {
    /// Fetch a required string field from the extra configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the field is missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config(format!("\"{key}\" is required and must be a string")))
    }
}

/// Constructor of a reporter from its descriptor.
pub type ReporterFactory = Arc<dyn Fn(ReporterArgs) -> Result<Reporter> + Send + Sync>;

/// Wrap a closure as a [`ReporterFactory`].
pub fn factory<F>(f: F) -> ReporterFactory
where
    F: Fn(ReporterArgs) -> Result<Reporter> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a descriptor's `reporter` field points at.
#[derive(Clone)]
pub enum Constructible {
    /// A constructor passed directly.
    Factory(ReporterFactory),
    /// A name resolved through the monitor's [`Resolver`].
    Named(String),
}

impl fmt::Debug for Constructible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constructible::Factory(_) => f.write_str("Factory(..)"),
            Constructible::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// `{ reporter, events, ...config }` entry of the reporters list.
#[derive(Debug, Clone)]
pub struct ReporterDescriptor {
    pub reporter: Constructible,
    /// Raw `events` object; parsed into a [`Filter`] when the monitor starts.
    pub events: Value,
    pub config: Map<String, Value>,
}

impl ReporterDescriptor {
    pub fn named(name: impl Into<String>, events: Value) -> Self {
        Self {
            reporter: Constructible::Named(name.into()),
            events,
            config: Map::new(),
        }
    }

    pub fn factory(factory: ReporterFactory, events: Value) -> Self {
        Self {
            reporter: Constructible::Factory(factory),
            events,
            config: Map::new(),
        }
    }

    /// Add an extra configuration field passed to the factory.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// One element of [`MonitorConfig::reporters`](crate::MonitorConfig::reporters).
pub enum ReporterSpec {
    /// An already constructed sink with its filter.
    Instance { reporter: Reporter, filter: Filter },
    /// A reporter built by the registry when the monitor starts.
    Descriptor(ReporterDescriptor),
}

impl ReporterSpec {
    pub fn instance(sink: impl Sink, filter: Filter) -> Self {
        ReporterSpec::Instance {
            reporter: Reporter::new(sink),
            filter,
        }
    }
}

impl From<ReporterDescriptor> for ReporterSpec {
    fn from(descriptor: ReporterDescriptor) -> Self {
        ReporterSpec::Descriptor(descriptor)
    }
}

impl fmt::Debug for ReporterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReporterSpec::Instance { reporter, filter } => f
                .debug_struct("Instance")
                .field("reporter", reporter)
                .field("filter", filter)
                .finish(),
            ReporterSpec::Descriptor(d) => f.debug_tuple("Descriptor").field(d).finish(),
        }
    }
}

impl<'de> Deserialize<'de> for ReporterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            reporter: String,
            #[serde(default)]
            events: Value,
            #[serde(flatten)]
            config: Map<String, Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(ReporterSpec::Descriptor(ReporterDescriptor {
            reporter: Constructible::Named(raw.reporter),
            events: raw.events,
            config: raw.config,
        }))
    }
}

/// Resolves reporter names to constructors.
///
/// Inject a resolver to control which reporter names a configuration may
/// refer to. [`FactoryTable`] is the standard implementation.
pub trait Resolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<ReporterFactory>;
}

/// A name → constructor map.
///
/// ```rust
/// use tidings::{FactoryTable, Reporter, Resolver, factory, reporters::Tracer};
///
/// let mut table = FactoryTable::new();
/// table.register("../test/helper", factory(|_args| Ok(Reporter::new(Tracer))));
///
/// assert!(table.resolve("../test/helper").is_some());
/// assert!(table.resolve("missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: HashMap<String, ReporterFactory>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the crate's own reporters: `tracer`,
    /// `collecting` and `recorder` (which needs a `path` field).
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register(
            "tracer",
            factory(|_args| Ok(Reporter::new(crate::reporters::Tracer))),
        );
        table.register(
            "collecting",
            factory(|_args| Ok(Reporter::new(crate::reporters::Collecting::new()))),
        );
        table.register(
            "recorder",
            factory(|args| {
                let path = args.require_str("path")?;
                let recorder = crate::reporters::Recorder::new(path)?;
                Ok(Reporter::new(recorder))
            }),
        );
        table
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: ReporterFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Resolver for FactoryTable {
    fn resolve(&self, name: &str) -> Option<ReporterFactory> {
        self.factories.get(name).cloned()
    }
}

impl fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("FactoryTable").field("names", &names).finish()
    }
}

/// A constructed reporter and its filter, ready for dispatch.
pub struct ReporterEntry {
    pub id: ReporterId,
    pub reporter: Reporter,
    pub filter: Filter,
}

impl fmt::Debug for ReporterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterEntry")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("reporter constructor panicked: {0}")]
struct ConstructorPanicked(String);

enum Checked {
    Ready(Reporter, Filter),
    Pending(ReporterDescriptor, Filter),
}

/// Turn configured reporter specs into entries, all or nothing.
///
/// Every spec is checked before anything is constructed, so configuration
/// mistakes are reported even when an earlier reporter would fail to build.
/// Then descriptors are resolved and constructed in order; the first failure
/// drops everything built so far and is returned.
///
/// # Errors
///
/// - [`Error::Config`] - an `events` filter is malformed or empty
/// - [`Error::ReporterResolution`] - a named reporter is unknown to `resolver`
/// - [`Error::ReporterConstruction`] - a constructor returned an error or panicked
pub fn build_reporters(
    specs: Vec<ReporterSpec>,
    resolver: &dyn Resolver,
) -> Result<Vec<ReporterEntry>> {
    let checked = specs
        .into_iter()
        .enumerate()
        .map(|(position, spec)| check(position, spec))
        .collect::<Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(checked.len());
    for (position, checked) in checked.into_iter().enumerate() {
        let (reporter, filter, name) = match checked {
            Checked::Ready(reporter, filter) => {
                let name = reporter.name().to_string();
                (reporter, filter, name)
            }
            Checked::Pending(descriptor, filter) => construct(descriptor, filter, resolver)?,
        };
        let id = ReporterId::indexed(&name, position);
        tracing::debug!(reporter = %id, subscriptions = filter.len(), "reporter constructed");
        entries.push(ReporterEntry {
            id,
            reporter,
            filter,
        });
    }
    Ok(entries)
}

fn check(position: usize, spec: ReporterSpec) -> Result<Checked> {
    let require_subscription = |filter: &Filter| {
        if filter.is_empty() {
            Err(Error::config(format!(
                "reporter at position {position}: at least one event subscription required"
            )))
        } else {
            Ok(())
        }
    };
    match spec {
        ReporterSpec::Instance { reporter, filter } => {
            require_subscription(&filter)?;
            Ok(Checked::Ready(reporter, filter))
        }
        ReporterSpec::Descriptor(descriptor) => {
            let filter = Filter::from_json(&descriptor.events).map_err(|e| match e {
                Error::Config(msg) => Error::config(format!("reporter at position {position}: {msg}")),
                other => other,
            })?;
            require_subscription(&filter)?;
            Ok(Checked::Pending(descriptor, filter))
        }
    }
}

fn construct(
    descriptor: ReporterDescriptor,
    filter: Filter,
    resolver: &dyn Resolver,
) -> Result<(Reporter, Filter, String)> {
    let (factory, name) = match descriptor.reporter {
        Constructible::Factory(factory) => (factory, None),
        Constructible::Named(name) => {
            let factory = resolver
                .resolve(&name)
                .ok_or_else(|| Error::ReporterResolution(name.clone()))?;
            (factory, Some(name))
        }
    };

    let args = ReporterArgs {
        filter: filter.clone(),
        config: descriptor.config,
    };
    let label = name.clone().unwrap_or_else(|| "<factory>".to_string());

    let reporter = match catch_unwind(AssertUnwindSafe(|| factory(args))) {
        Ok(Ok(reporter)) => reporter,
        Ok(Err(e)) => return Err(Error::construction(&label, e)),
        Err(panic) => {
            let msg = panic_message(&*panic);
            return Err(Error::construction(&label, ConstructorPanicked(msg)));
        }
    };

    let name = name.unwrap_or_else(|| reporter.name().to_string());
    Ok((reporter, filter, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, reporters::Collecting};
    use serde_json::json;

    fn helper_table(sink: &Collecting) -> FactoryTable {
        let shared = sink.clone();
        let mut table = FactoryTable::new();
        table.register(
            "../test/helper",
            factory(move |_| Ok(Reporter::new(shared.clone()))),
        );
        table
    }

    #[test]
    fn zero_reporters_is_legal() {
        let entries = build_reporters(Vec::new(), &FactoryTable::new()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn mixes_instances_and_descriptors() {
        let sink = Collecting::new();
        let specs = vec![
            ReporterSpec::instance(Collecting::new(), Filter::new().all("ops")),
            ReporterDescriptor::named("../test/helper", json!({ "ops": "*" })).into(),
        ];

        let entries = build_reporters(specs, &helper_table(&sink)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id.as_str(), "collecting#0");
        assert_eq!(entries[1].id.as_str(), "../test/helper#1");
        let ops = Envelope::new("ops".into(), json!({}));
        assert!(entries.iter().all(|e| e.filter.matches(&ops)));
    }

    #[test]
    fn descriptor_factory_receives_extra_config() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = seen.clone();
        let f = factory(move |args: ReporterArgs| {
            *s.lock().unwrap() = Some(args.require_str("path")?.to_string());
            Ok(Reporter::new(Collecting::new()))
        });
        let spec = ReporterDescriptor::factory(f, json!({ "log": "*" })).with_config("path", "/tmp/x");

        build_reporters(vec![spec.into()], &FactoryTable::new()).unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn unknown_name_is_a_resolution_error() {
        let spec = ReporterDescriptor::named("nope", json!({ "log": "*" }));
        let err = build_reporters(vec![spec.into()], &FactoryTable::new()).unwrap_err();
        assert_eq!(err, Error::ReporterResolution("nope".into()));
    }

    #[test]
    fn empty_filter_is_rejected() {
        let spec = ReporterDescriptor::named("tracer", json!({}));
        let err = build_reporters(vec![spec.into()], &FactoryTable::with_builtins()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("at least one event subscription required"));

        let instance = ReporterSpec::instance(Collecting::new(), Filter::new());
        let err = build_reporters(vec![instance], &FactoryTable::new()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn config_errors_win_over_construction() {
        let failing = factory(|_| Err(Error::config("boom")));
        let specs = vec![
            ReporterDescriptor::factory(failing, json!({ "log": "*" })).into(),
            ReporterDescriptor::named("tracer", json!({ "log": 3 })).into(),
        ];
        let err = build_reporters(specs, &FactoryTable::with_builtins()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn construction_failure_aborts_everything() {
        let specs = vec![
            ReporterDescriptor::named("tracer", json!({ "log": "*" })).into(),
            ReporterDescriptor::named("recorder", json!({ "log": "*" })).into(),
        ];
        let err = build_reporters(specs, &FactoryTable::with_builtins()).unwrap_err();
        match err {
            Error::ReporterConstruction { reporter, source } => {
                assert_eq!(reporter, "recorder");
                assert!(source.to_string().contains("\"path\" is required"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panicking_constructor_is_a_construction_error() {
        let spec = ReporterDescriptor::factory(
            factory(|_| panic!("no disk")),
            json!({ "log": "*" }),
        );
        let err = build_reporters(vec![spec.into()], &FactoryTable::new()).unwrap_err();
        assert!(matches!(err, Error::ReporterConstruction { .. }));
        assert!(err.to_string().contains("no disk"));
    }

    #[test]
    fn descriptors_deserialize_with_extra_fields() {
        let spec: ReporterSpec = serde_json::from_value(json!({
            "reporter": "recorder",
            "events": { "response": "*" },
            "path": "out.jsonl"
        }))
        .unwrap();
        let ReporterSpec::Descriptor(d) = spec else {
            panic!("expected descriptor");
        };
        assert!(matches!(d.reporter, Constructible::Named(ref n) if n == "recorder"));
        assert_eq!(d.config.get("path"), Some(&json!("out.jsonl")));
        assert!(d.config.get("events").is_none());
    }
}
