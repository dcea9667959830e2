use anyhow::{Context, Result, anyhow};
use opentelemetry::KeyValue;
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Telemetry handle for OpenTelemetry tracing.
pub(crate) struct Telemetry {
    tracer: opentelemetry_sdk::trace::SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Run a closure inside a span when telemetry is enabled.
    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    /// Flush spans and shut down the tracer provider.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.provider.shutdown() {
            return Err(anyhow!("failed to shutdown tracer provider: {err}"));
        }
        Ok(())
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder().with_service_name("forbidden-apis").build();
        // The batch processor exports from its own thread, which suits the
        // blocking reqwest client.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("forbidden-apis");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Log verbosity selected on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LogLevel {
    Quiet,
    Normal,
    Debug,
}

impl LogLevel {
    fn default_filter(self) -> &'static str {
        match self {
            LogLevel::Quiet => "warn",
            LogLevel::Normal => "forbidden_apis=info,warn",
            LogLevel::Debug => "forbidden_apis=debug,info",
        }
    }
}

/// Initialize logging facade with stderr output.
///
/// `RUST_LOG` wins over the level chosen on the command line.
pub(crate) fn init_logging(level: LogLevel) {
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.default_filter())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
    let _ = init_result;
}

/// Optional telemetry span helper.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}
