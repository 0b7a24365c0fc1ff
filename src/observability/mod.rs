//! OpenTelemetry-based observability with file-based trace export.
//!
//! ```text
//! tracing → tracing-opentelemetry → OpenTelemetry SDK → FileSpanExporter → JSON file
//! ```
//!
//! Exporting is enabled by setting `trace_file` in [`Config`](crate::Config).
//! Each exported batch becomes one OTLP JSON line; the file rotates by size
//! and keeps a bounded number of backups. Without a trace file, events are
//! printed to stderr instead.
//!
//! The filter is taken from `RUST_LOG` if set, then `trace_level`, then
//! `"info"`.
//!
//! # Modules
//!
//! - [`init`]: subscriber setup
//! - [`tracer`]: tracer provider with file export
//! - [`span_formatter`]: OTLP JSON serialization
//! - [`file_writer`]: size-rotated file writer

mod file_writer;
mod init;
mod span_formatter;
mod tracer;

pub use file_writer::{FileWriter, RotationPolicy};
pub use init::init_tracing;
