//! Logging and trace export.
//!
//! Log lines go to stderr so that stdout only carries the command summary.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Reported as `service.name` unless `OTEL_SERVICE_NAME` says otherwise.
const SERVICE_NAME: &str = "kensure";

/// Keeps the trace exporter alive; pending spans are flushed when dropped.
#[must_use = "traces are only flushed when the guard is dropped"]
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("failed to shut down tracer provider: {e}");
			}
		}
	}
}

/// Install the global tracing subscriber.
///
/// The filter comes from `log_level` when given, otherwise from `RUST_LOG`,
/// defaulting to `info`. Output is human readable on a terminal and JSON
/// everywhere else. Spans are additionally exported over OTLP when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` or `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let output = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	let output = if std::io::stderr().is_terminal() {
		output.pretty().boxed()
	} else {
		output.json().boxed()
	};

	let tracer_provider = if otlp_configured() {
		Some(tracer_provider()?)
	} else {
		None
	};
	let otel = tracer_provider.as_ref().map(|provider| {
		tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME))
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(output)
		.with(otel)
		.init();

	Ok(TelemetryGuard { tracer_provider })
}

fn otlp_configured() -> bool {
	[
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT,
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
	]
	.iter()
	.any(|var| std::env::var_os(var).is_some())
}

/// Build a batch-exporting tracer provider and register it globally.
fn tracer_provider() -> Result<SdkTracerProvider> {
	// The builder already honours OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES
	let mut resource = Resource::builder();
	if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
	let exporter = match protocol
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	let provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build();
	opentelemetry::global::set_tracer_provider(provider.clone());

	Ok(provider)
}
