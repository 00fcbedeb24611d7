#![allow(dead_code)]

use std::env;

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::sdk::resource::Resource;
use opentelemetry::sdk::trace as sdktrace;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use tracing_subscriber::prelude::*;

pub struct TelemetryGuard {
    tracer_provider: Option<sdktrace::TracerProvider>,
}

static INIT: OnceCell<()> = OnceCell::new();

fn telemetry_enabled_env() -> bool {
    let toggled = env::var("HELPER_BROKER_OTEL").ok().as_deref() == Some("1");
    let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .is_some();
    toggled || endpoint
}

fn build_resource() -> Resource {
    let service_name = env::var("OTEL_SERVICE_NAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "helper-broker".to_string());

    let mut attrs = Vec::new();
    attrs.push(KeyValue::new("service.name", service_name));
    attrs.push(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")));

    let pid = std::process::id() as i64;
    attrs.push(KeyValue::new("process.pid", pid));

    if let Ok(host) = hostname::get() {
        if let Ok(s) = host.into_string() {
            attrs.push(KeyValue::new("host.name", s));
        }
    }

    Resource::new(attrs)
}

/// Install an OpenTelemetry-backed tracing subscriber when telemetry is
/// enabled via the environment. Returns `None` (and leaves the plain
/// stderr subscriber to the caller) otherwise.
pub fn telemetry_init() -> Option<TelemetryGuard> {
    if INIT.get().is_some() {
        return None;
    }
    if !telemetry_enabled_env() {
        return None;
    }

    let resource = build_resource();
    let exporter = opentelemetry_stdout::SpanExporter::default();
    let provider = sdktrace::TracerProvider::builder()
        .with_simple_exporter(exporter)
        .with_config(sdktrace::Config::default().with_resource(resource))
        .build();
    let tracer = provider.tracer("helper-broker");

    global::set_tracer_provider(provider.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if registry.try_init().is_err() {
        eprintln!("helper-broker: telemetry init skipped (global subscriber already set)");
        return None;
    }

    let _ = INIT.set(());

    Some(TelemetryGuard {
        tracer_provider: Some(provider),
    })
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        global::shutdown_tracer_provider();
    }
}
