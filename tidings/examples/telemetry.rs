//! Simulates a small web server emitting events onto an [`EventBus`] while a
//! monitor fans them out to three reporters.
//!
//! Run with `cargo run --example telemetry`.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tidings::{
    EventBus, EventKind, Filter, Monitor, MonitorConfig, ReporterDescriptor, ReporterSpec,
    reporters::{Collecting, Tracer},
};

#[tokio::main]
async fn main() -> tidings::Result {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let bus = EventBus::new();
    let errors = Collecting::new();
    let events_path = std::env::temp_dir().join("tidings-telemetry.jsonl");

    let config = MonitorConfig::default()
        .with_response_event("response")
        .with_ops_interval(Duration::from_millis(500))
        .with_extension("onPreResponse")
        .with_reporter(ReporterSpec::instance(
            Tracer,
            Filter::new().all("response").all("ops").all("onPreResponse"),
        ))
        .with_reporter(ReporterSpec::instance(
            errors.clone(),
            Filter::new().all("error").tagged("log", ["error"]),
        ))
        .with_reporter(
            ReporterDescriptor::named("recorder", json!({ "response": "*", "request": "*" }))
                .with_config("path", events_path.to_string_lossy().into_owned()),
        );

    let mut monitor = Monitor::new(Arc::new(bus.clone()), config);
    monitor.start().await?;
    println!("{}", monitor.to_mermaid());

    for (n, path) in ["/", "/users", "/missing", "/users/7"].iter().enumerate() {
        bus.set_active_connections(n as u64 + 1);
        bus.emit_tagged("request", json!({ "path": path }), ["received"]);
        bus.emit("onPreResponse", json!({ "path": path }));
        let status = if *path == "/missing" { 404 } else { 200 };
        bus.emit("response", json!({ "path": path, "statusCode": status }));
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    bus.emit("request-error", json!({ "message": "database timeout" }));
    bus.emit_tagged("log", json!("cache unavailable"), ["error", "cache"]);
    bus.emit_tagged("log", json!("cache warmed"), ["info"]);

    monitor.stop().await?;

    println!("{}", monitor.to_json()?);
    println!(
        "collected {} errors ({} request errors); events recorded to {}",
        errors.len(),
        errors.count_of(&EventKind::Error),
        events_path.display()
    );
    Ok(())
}
