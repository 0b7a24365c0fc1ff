//! Tracing initialization and subscriber setup.

use super::file_writer::RotationPolicy;
use super::tracer;
use crate::infrastructure::paths::{get_data_dir, resolve_in_data_dir};
use crate::Config;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::resource::Resource;
use std::path::PathBuf;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Service and scope name attached to exported spans.
const SERVICE_NAME: &str = "replay-bridge";

fn env_filter(config: &Config) -> EnvFilter {
    let level = config.trace_level.as_deref().unwrap_or("info");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Resolves the configured trace file and makes sure its directory exists.
fn prepare_trace_file(trace_file: &str) -> Option<PathBuf> {
    let path = resolve_in_data_dir(trace_file, &get_data_dir());
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("replay-bridge: cannot create trace directory {}: {e}", parent.display());
            return None;
        }
    }
    Some(path)
}

/// Initializes the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` if set, otherwise from
/// `config.trace_level` (default `"info"`).
///
/// With `config.trace_file` set, spans are exported as OTLP JSON to that file,
/// rotated per `trace_max_bytes` / `trace_max_backups`. Otherwise, or if the
/// trace directory cannot be created, events are formatted to stderr.
///
/// Only the first call installs a subscriber; later calls are no-ops.
///
/// # Example
///
/// ```rust
/// use replay_bridge::observability::init_tracing;
/// use replay_bridge::Config;
///
/// let config = Config {
///     trace_level: Some("debug".to_string()),
///     ..Default::default()
/// };
///
/// init_tracing(&config);
/// tracing::debug!("tracing is now active");
/// ```
pub fn init_tracing(config: &Config) {
    let trace_file = config.trace_file.as_deref().and_then(prepare_trace_file);

    let Some(trace_file) = trace_file else {
        let _ = tracing_subscriber::registry()
            .with(env_filter(config))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
        return;
    };

    let resource = Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        SERVICE_NAME,
    )]);
    let policy = RotationPolicy {
        max_bytes: config.trace_max_bytes,
        max_backups: config.trace_max_backups,
    };

    let provider = tracer::create_tracer_provider(trace_file, policy, resource, SERVICE_NAME);
    let tracer = provider.tracer(SERVICE_NAME);
    let _ = opentelemetry::global::set_tracer_provider(provider);

    let _ = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init();
}
