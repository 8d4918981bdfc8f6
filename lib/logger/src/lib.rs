use std::time::Duration;

use anyhow::Context;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, Tracer};
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tesp_client::entities::logger::{LogConfig, StdioLogMode};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
  Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level: tracing::Level = config.level.into();

  let registry =
    Registry::default().with(LevelFilter::from(log_level));

  let has_otel = !config.otlp_endpoint.is_empty();

  match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .with(has_otel.then(|| {
        OpenTelemetryLayer::new(tracer(
          &config.otlp_endpoint,
          config.opentelemetry_service_name.clone(),
        ))
      }))
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .with(has_otel.then(|| {
        OpenTelemetryLayer::new(tracer(
          &config.otlp_endpoint,
          config.opentelemetry_service_name.clone(),
        ))
      }))
      .try_init(),
    (StdioLogMode::Json, _) => registry
      .with(tracing_subscriber::fmt::layer().json())
      .with(has_otel.then(|| {
        OpenTelemetryLayer::new(tracer(
          &config.otlp_endpoint,
          config.opentelemetry_service_name.clone(),
        ))
      }))
      .try_init(),
    (StdioLogMode::None, _) => {
      if !has_otel {
        return Ok(());
      }
      registry
        .with(Some(OpenTelemetryLayer::new(tracer(
          &config.otlp_endpoint,
          config.opentelemetry_service_name.clone(),
        ))))
        .try_init()
    }
  }
  .context("failed to init logger")
}

fn tracer(endpoint: &str, service_name: String) -> Tracer {
  let provider =
    opentelemetry_sdk::trace::TracerProviderBuilder::default()
      .with_resource(
        opentelemetry_sdk::Resource::builder()
          .with_service_name(service_name.clone())
          .with_attribute(KeyValue::new(
            SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
          ))
          .build(),
      )
      .with_sampler(Sampler::AlwaysOn)
      .with_batch_exporter(
        opentelemetry_otlp::SpanExporter::builder()
          .with_http()
          .with_endpoint(endpoint)
          .with_timeout(Duration::from_secs(3))
          .build()
          .expect("invalid otlp exporter config"),
      )
      .build();
  global::set_tracer_provider(provider.clone());
  provider.tracer(service_name)
}
