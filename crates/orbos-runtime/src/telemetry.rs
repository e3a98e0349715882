//! `tracing` initialisation for orbos.
//!
//! Call [`init_tracing`] once at process startup.  The flight log's levels
//! map onto `tracing` as follows:
//!
//! | Flight log | `tracing` |
//! |---|---|
//! | DEBUG | `debug!` |
//! | INFO | `info!` |
//! | EVENT | `info!` with target `orbos::event` |
//! | WARNING | `warn!` |
//! | FATAL | `error!` with target `orbos::fatal`; never filtered out |
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Overrides the configured level. |
//! | `ORBOS_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! use orbos_types::LogLevel;
//!
//! // Hold the guard for the entire lifetime of the process.
//! let (_guard, _levels) = orbos_runtime::telemetry::init_tracing("orbos", LogLevel::Info);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use orbos_kernel::LogLevelSink;
use orbos_types::{LogLevel, OrbError};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt};

/// Target of EVENT-level records.
pub const EVENT_TARGET: &str = "orbos::event";

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the global `tracing` subscriber at `level`, with an optional
/// OTLP exporter.
///
/// The filter sits behind a reload layer; the returned [`LogLevelHandle`]
/// changes it at run time.  The returned [`TracerProviderGuard`] **must** be
/// held for the lifetime of the process; dropping it flushes all pending
/// span batches.
pub fn init_tracing(service_name: &str, level: LogLevel) -> (TracerProviderGuard, LogLevelHandle) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    let use_json = std::env::var("ORBOS_LOG_FORMAT").as_deref() == Ok("json");

    let provider = build_provider(service_name);

    if let Some(ref p) = provider {
        let tracer = p.tracer("orbos");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        if use_json {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    } else if use_json {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }

    (TracerProviderGuard(provider), LogLevelHandle { inner: handle })
}

/// Filter that shows `level` and above.  ERROR (and therefore every FATAL
/// record) passes all of them.
pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::new(directive_for(level))
}

fn directive_for(level: LogLevel) -> String {
    match level {
        LogLevel::Debug => "debug".to_string(),
        LogLevel::Info => "info".to_string(),
        LogLevel::Event => format!("warn,{EVENT_TARGET}=info"),
        LogLevel::Warning => "warn".to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run-time level changes
// ─────────────────────────────────────────────────────────────────────────────

/// Swaps the active filter.  Handed to the task manager so that
/// `SetLogLevel` commands take effect immediately.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelSink for LogLevelHandle {
    fn set_level(&self, level: LogLevel) -> Result<(), OrbError> {
        self.inner
            .reload(filter_for(level))
            .map_err(|e| OrbError::Config(format!("cannot change log level: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// RAII guard that shuts down the OTel [`SdkTracerProvider`] on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[orbos] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Build an [`SdkTracerProvider`] when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Returns `None` when the env-var is absent or the exporter cannot be
/// initialised; the caller then falls back to console output only.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[orbos] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Simple exporter: no tokio runtime exists yet when the CLI
            // calls `init_tracing`.
            .with_simple_exporter(exporter)
            .build(),
    )
}
