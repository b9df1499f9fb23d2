//! Resource, exporter, and provider construction for both signals.

use crate::config::{BatchConfig, Protocol, SmokeConfig};
use crate::error::SmokeError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::tonic_types::transport::ClientTlsConfig;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use std::collections::HashMap;
use std::time::Duration;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

pub(crate) const TRACES_PATH: &str = "/v1/traces";
pub(crate) const METRICS_PATH: &str = "/v1/metrics";

/// Builds the one resource shared by the trace and metric providers.
pub(crate) fn build_resource(config: &SmokeConfig) -> Resource {
    let mut attributes: Vec<KeyValue> = config
        .resource
        .attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();

    if let Some(version) = &config.resource.service_version {
        attributes.push(KeyValue::new(SERVICE_VERSION, version.clone()));
    }

    // service.name goes last so a stray attribute can't shadow it.
    Resource::builder()
        .with_attributes(attributes)
        .with_service_name(config.resource.service_name.clone())
        .build()
}

fn build_tonic_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        if let (Ok(k), Ok(v)) = (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        }
    }
    metadata
}

fn otlp_protocol(protocol: Protocol) -> opentelemetry_otlp::Protocol {
    match protocol {
        Protocol::Grpc => opentelemetry_otlp::Protocol::Grpc,
        Protocol::HttpBinary => opentelemetry_otlp::Protocol::HttpBinary,
        Protocol::HttpJson => opentelemetry_otlp::Protocol::HttpJson,
    }
}

macro_rules! build_exporter {
    ($config:expr, $exporter_type:ident, $signal_path:expr, $error_variant:ident) => {{
        let endpoint = $config.signal_endpoint($signal_path)?;
        match $config.endpoint.protocol {
            Protocol::Grpc => {
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_tonic()
                    .with_endpoint(&endpoint)
                    .with_timeout($config.endpoint.timeout);

                if !$config.endpoint.headers.is_empty() {
                    builder =
                        builder.with_metadata(build_tonic_metadata(&$config.endpoint.headers));
                }

                if endpoint.starts_with("https://") {
                    builder = builder.with_tls_config(ClientTlsConfig::new().with_enabled_roots());
                }

                builder.build().map_err(SmokeError::$error_variant)?
            }
            protocol @ (Protocol::HttpBinary | Protocol::HttpJson) => {
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_http()
                    .with_endpoint(&endpoint)
                    .with_timeout($config.endpoint.timeout)
                    .with_protocol(otlp_protocol(protocol));

                if !$config.endpoint.headers.is_empty() {
                    builder = builder.with_headers($config.endpoint.headers.clone());
                }

                builder.build().map_err(SmokeError::$error_variant)?
            }
        }
    }};
}

/// Builds the OTLP span exporter for the configured endpoint.
pub(crate) fn otlp_span_exporter(
    config: &SmokeConfig,
) -> Result<opentelemetry_otlp::SpanExporter, SmokeError> {
    Ok(build_exporter!(config, SpanExporter, TRACES_PATH, TraceExporter))
}

/// Builds the OTLP metric exporter for the configured endpoint.
pub(crate) fn otlp_metric_exporter(
    config: &SmokeConfig,
) -> Result<opentelemetry_otlp::MetricExporter, SmokeError> {
    Ok(build_exporter!(config, MetricExporter, METRICS_PATH, MetricExporter))
}

/// Tracer provider with a batching span processor in front of `exporter`.
pub(crate) fn tracer_provider<E>(
    exporter: E,
    batch: &BatchConfig,
    resource: Resource,
) -> SdkTracerProvider
where
    E: SpanExporter + 'static,
{
    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_max_export_batch_size(batch.max_export_batch_size)
        .with_scheduled_delay(batch.scheduled_delay)
        .build();

    let span_processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    SdkTracerProvider::builder()
        .with_span_processor(span_processor)
        .with_resource(resource)
        .build()
}

/// Meter provider with a periodic reader pushing to `exporter` every `interval`.
pub(crate) fn meter_provider<E>(
    exporter: E,
    interval: Duration,
    resource: Resource,
) -> SdkMeterProvider
where
    E: PushMetricExporter,
{
    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_semantic_conventions::resource::SERVICE_NAME;

    fn attribute(resource: &Resource, key: &str) -> Option<String> {
        resource
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.to_string())
    }

    #[test]
    fn build_resource_includes_service_name() {
        let resource = build_resource(&SmokeConfig::default());
        assert_eq!(
            attribute(&resource, SERVICE_NAME).as_deref(),
            Some("test-otel-python")
        );
    }

    #[test]
    fn build_resource_includes_version_and_custom_attributes() {
        let mut config = SmokeConfig::default();
        config.resource.service_version = Some("0.3.0".to_string());
        config
            .resource
            .attributes
            .insert("custom.key".to_string(), "custom-value".to_string());

        let resource = build_resource(&config);

        assert_eq!(attribute(&resource, SERVICE_VERSION).as_deref(), Some("0.3.0"));
        assert_eq!(
            attribute(&resource, "custom.key").as_deref(),
            Some("custom-value")
        );
    }

    #[test]
    fn service_name_attribute_cannot_be_shadowed() {
        let mut config = SmokeConfig::default();
        config
            .resource
            .attributes
            .insert(SERVICE_NAME.to_string(), "shadow".to_string());

        let resource = build_resource(&config);

        assert_eq!(
            attribute(&resource, SERVICE_NAME).as_deref(),
            Some("test-otel-python")
        );
    }

    #[test]
    fn build_tonic_metadata_parses_valid_headers() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer token123".to_string());
        headers.insert("x-custom-header".to_string(), "value".to_string());

        let metadata = build_tonic_metadata(&headers);

        assert_eq!(metadata.len(), 2);
        assert!(metadata.get("authorization").is_some());
        assert!(metadata.get("x-custom-header").is_some());
    }

    #[test]
    fn build_tonic_metadata_skips_invalid_keys() {
        let mut headers = HashMap::new();
        headers.insert("bad key".to_string(), "value".to_string());

        let metadata = build_tonic_metadata(&headers);
        assert_eq!(metadata.len(), 0);
    }

    #[test]
    fn http_span_exporter_builds_without_runtime() {
        let mut config = SmokeConfig::default();
        config.endpoint.protocol = Protocol::HttpBinary;
        assert!(otlp_span_exporter(&config).is_ok());
    }

    #[test]
    fn invalid_endpoint_fails_exporter_construction() {
        let mut config = SmokeConfig::default();
        config.endpoint.url = Some("localhost".to_string());
        assert!(matches!(
            otlp_metric_exporter(&config),
            Err(SmokeError::InvalidEndpoint { .. })
        ));
    }
}
