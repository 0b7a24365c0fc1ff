//! JSON-lines driver for the replay bridge.
//!
//! Reads one method call per line on stdin, dispatches it to the session replay
//! plugin backed by an in-memory telemetry core, and writes one JSON line per
//! call on stdout. Invocations the plugin makes on the managed layer
//! (`onContextChanged`) are written to stdout as they happen. When stdin is
//! exhausted a summary of the core's state is printed.
//!
//! # Usage
//!
//! ```text
//! replay-bridge [config.toml] < calls.jsonl
//! ```
//!
//! # Input
//!
//! ```text
//! {"method":"enable","arguments":{"configuration":{}}}
//! {"method":"core.updateContext","arguments":{"rum":{"applicationID":"app","sessionID":"s1","viewID":"v1"}}}
//! {"method":"writeSegment","arguments":{"record":"{...}","viewId":"v1"}}
//! ```
//!
//! `core.updateContext` is handled by the driver itself: every argument is
//! stored as a baggage (`null` removes it) and the new context is broadcast.
//!
//! # Output
//!
//! - `{"invoke":"onContextChanged","arguments":{...}}` for channel invocations
//! - `{"method":"...","result":"ok"}` or `{"method":"...","error":{"code":"...","message":"..."}}`
//! - a final `{"summary":{...}}` with baggage, batches, segments and diagnostics

#![allow(clippy::multiple_crate_versions)]

use replay_bridge::observability::init_tracing;
use replay_bridge::plugin::{MethodCall, MethodChannel, SessionReplayPlugin};
use replay_bridge::replay::{segments_from_batch, FEATURE_NAME};
use replay_bridge::telemetry::{InMemoryCore, TelemetryCore};
use replay_bridge::{initialize, BridgeError, Config};
use serde_json::{json, Map, Value};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

/// Driver-level method updating the core context.
const UPDATE_CONTEXT_METHOD: &str = "core.updateContext";

/// Channel printing managed-layer invocations to stdout.
struct StdoutChannel;

impl MethodChannel for StdoutChannel {
    fn invoke_method(&self, method: &str, arguments: Value) {
        tracing::debug!(method = %method, "invoking managed-layer method");
        emit(&json!({ "invoke": method, "arguments": arguments }));
    }
}

fn emit(value: &Value) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{value}").and_then(|()| stdout.flush()) {
        tracing::debug!(error = %e, "failed to write to stdout");
    }
}

fn load_config() -> replay_bridge::Result<Config> {
    std::env::args()
        .nth(1)
        .map_or_else(|| Ok(Config::default()), Config::from_file)
}

fn error_line(method: &str, code: &str, message: &str) -> Value {
    json!({ "method": method, "error": { "code": code, "message": message } })
}

/// Applies a `core.updateContext` call.
fn update_context(memory: &InMemoryCore, arguments: &Value) -> Value {
    let Some(arguments) = arguments.as_object() else {
        return error_line(
            UPDATE_CONTEXT_METHOD,
            "DatadogSdk:InvalidOperation",
            "No arguments in call to core.updateContext",
        );
    };

    let baggages = arguments.iter().map(|(key, value)| {
        let value = if value.is_null() { None } else { Some(value.clone()) };
        (key.clone(), value)
    });
    let handled = memory.update_context(baggages);

    json!({ "method": UPDATE_CONTEXT_METHOD, "result": "ok", "handled": handled })
}

fn dispatch(line: &str, memory: &InMemoryCore, plugin: &mut SessionReplayPlugin) -> Value {
    let call: MethodCall = match serde_json::from_str(line) {
        Ok(call) => call,
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode method call");
            return error_line("", "DatadogSdk:ContractViolation", &BridgeError::from(e).to_string());
        }
    };

    let _span = tracing::debug_span!("driver_call", method = %call.method).entered();

    if call.method == UPDATE_CONTEXT_METHOD {
        return update_context(memory, &call.arguments);
    }

    match plugin.handle(&call) {
        Ok(()) => json!({ "method": call.method, "result": "ok" }),
        Err(e) => error_line(&call.method, e.code(), &e.to_string()),
    }
}

fn summary(memory: &InMemoryCore, source: &str) -> Value {
    let baggage: Map<String, Value> = memory
        .context()
        .baggages
        .into_iter()
        .map(|(key, baggage)| (key, baggage.value().clone()))
        .collect();

    let batches: Vec<Value> = memory
        .batches(FEATURE_NAME)
        .into_iter()
        .map(|batch| {
            let segments: Vec<Value> = segments_from_batch(&batch.events, source)
                .iter()
                .filter_map(|segment| match segment.to_json() {
                    Ok(json) => Some(json),
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to encode segment");
                        None
                    }
                })
                .collect();

            json!({
                "id": batch.id,
                "createdAt": batch.created_at,
                "events": batch.events.len(),
                "segments": segments,
            })
        })
        .collect();

    json!({
        "summary": {
            "features": memory.features(),
            "baggage": baggage,
            "batches": batches,
            "diagnostics": memory.diagnostics(),
        }
    })
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("replay-bridge: {e}");
            return ExitCode::from(2);
        }
    };

    init_tracing(&config);
    let _span = tracing::debug_span!("replay_bridge_run").entered();

    let memory = initialize(&config);
    let core: Arc<dyn TelemetryCore> = memory.clone();
    let mut plugin = SessionReplayPlugin::new(&core, Arc::new(StdoutChannel));

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("replay-bridge: failed to read stdin: {e}");
                return ExitCode::FAILURE;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = dispatch(&line, &memory, &mut plugin);
        emit(&result);
    }

    emit(&summary(&memory, &config.source));
    tracing::debug!("replay bridge finished");
    ExitCode::SUCCESS
}
