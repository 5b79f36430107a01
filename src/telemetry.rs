//! Log output and optional OpenTelemetry export
//!
//! Logs always go to stdout through the `tracing-subscriber` fmt layer. When
//! `[global.tracing]` is enabled, spans are also exported to an OTLP
//! collector (Jaeger, Tempo, ...).

use anyhow::{Context, Result};
use config::TracingConfig;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Parse a log level name, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the OTLP tracer provider if tracing export is enabled.
///
/// Must be called inside a tokio runtime; the batch exporter spawns onto it.
pub fn init_provider(config: &TracingConfig) -> Result<Option<SdkTracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let sampler = if config.sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sampling_ratio)
    };

    let trace_config = opentelemetry_sdk::trace::Config::default()
        .with_sampler(sampler)
        .with_resource(Resource::new(vec![opentelemetry::KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]));

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&config.otlp_endpoint),
        )
        .with_trace_config(trace_config)
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .with_context(|| format!("Failed to create OTLP exporter for {}", config.otlp_endpoint))?;

    Ok(Some(provider))
}

/// Install the global subscriber: fmt output, plus span export when a
/// provider is given
pub fn init_logging(level: &str, provider: Option<&SdkTracerProvider>, service_name: &str) -> Result<()> {
    let otel = provider.map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string())));

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(parse_level(level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(otel)
        .try_init()
        .context("Failed to set tracing subscriber")
}

/// Flush pending spans
pub fn shutdown(provider: Option<SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::error!(error = %e, "Error shutting down tracer provider");
        }
    }
}
