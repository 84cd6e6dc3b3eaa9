//! Log and span output for the Triton processes.
//!
//! Every role runs as its own process, so each one installs its own
//! subscriber through [`init_tracing`] and names itself after its role
//! (`triton-modeling`, `triton-mission`, ...).  Output goes to stderr because
//! a role configured with `-` writes its channel to stdout.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | `EnvFilter` directives, `info` when unset or unparsable. |
//! | `TRITON_LOG_FORMAT` | `json` for one JSON object per event, anything else for compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Ship the `modeling`/`mission`/`control`/`replay` spans to this OTLP/HTTP collector. |
//!
//! ```rust,no_run
//! let _guard = triton_runtime::telemetry::init_tracing("triton-modeling");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "TRITON_LOG_FORMAT";
/// Environment variable naming the OTLP collector.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// How events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Interpret the value of [`LOG_FORMAT_ENV`].
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber for the process named `service_name`.
///
/// Call once, before the Tokio runtime is built, and keep the guard alive
/// until exit so buffered spans reach the collector.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let provider = build_provider(service_name, std::env::var(OTLP_ENDPOINT_ENV).ok());

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("triton")));
    let (json, compact) = match format {
        LogFormat::Json => (Some(fmt::layer().with_writer(std::io::stderr).json()), None),
        LogFormat::Compact => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).compact()),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .init();

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the span exporter when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone, so report straight to stderr.
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[triton] span exporter shutdown failed: {e}");
        }
    }
}

/// `None` without an endpoint or when the exporter cannot be built.
fn build_provider(service_name: &str, endpoint: Option<String>) -> Option<SdkTracerProvider> {
    let endpoint = endpoint.filter(|e| !e.trim().is_empty())?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[triton] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            // No runtime exists yet when the CLI calls in here.
            .with_simple_exporter(exporter)
            .build(),
    )
}
