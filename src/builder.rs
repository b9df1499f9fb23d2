//! Builder for the smoke test configuration and telemetry pipelines.
//!
//! Configuration is layered from multiple sources:
//! 1. Compiled defaults (the values of the reference smoke run)
//! 2. An optional TOML file
//! 3. Standard `OTEL_*` environment variables
//! 4. Prefixed environment variables
//! 5. Programmatic overrides
//!
//! Sources are merged in the order they are added, later sources winning.

use crate::SmokeError;
use crate::config::{ExitPolicy, Protocol, SmokeConfig};
use crate::telemetry::Telemetry;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::SpanExporter;
use std::path::Path;
use std::time::Duration;

/// Builder for configuring and starting the telemetry pipelines.
///
/// # Example
///
/// ```no_run
/// use otlp_smoke::{SmokeError, TelemetryBuilder};
///
/// fn main() -> Result<(), SmokeError> {
///     let runtime = tokio::runtime::Runtime::new().map_err(SmokeError::Runtime)?;
///     let _entered = runtime.enter();
///
///     let telemetry = TelemetryBuilder::new()
///         .with_standard_env()
///         .endpoint("localhost:4317")
///         .service_name("checkout")
///         .build()?;
///
///     telemetry.shutdown()
/// }
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct TelemetryBuilder {
    figment: Figment,
}

impl TelemetryBuilder {
    /// Creates a new builder with the default configuration.
    ///
    /// Defaults include:
    /// - Protocol: gRPC, plaintext, `localhost:4317`
    /// - Service name: `test-otel-python`
    /// - Metric export interval: 5 seconds
    /// - Exit policy: flush and shut down
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(SmokeConfig::default())),
        }
    }

    /// Merges configuration from a TOML file.
    ///
    /// If the file doesn't exist, it's silently skipped.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.figment = self.figment.merge(Toml::file(path));
        }
        self
    }

    /// Merges configuration from environment variables with the given prefix.
    ///
    /// Nested keys are separated by a double underscore. With prefix
    /// `OTLP_SMOKE_`:
    /// - `OTLP_SMOKE_ENDPOINT__URL` → `endpoint.url`
    /// - `OTLP_SMOKE_METRICS__EXPORT_INTERVAL` → `metrics.export_interval`
    /// - `OTLP_SMOKE_WORKLOAD__SPAN_NAME` → `workload.span_name`
    /// - `OTLP_SMOKE_EXIT_POLICY` → `exit_policy`
    pub fn with_env(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(prefix).split("__"));
        self
    }

    /// Merges configuration from standard OpenTelemetry environment variables:
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT` → endpoint URL
    /// - `OTEL_EXPORTER_OTLP_PROTOCOL` → protocol (grpc, http/protobuf, http/json)
    /// - `OTEL_EXPORTER_OTLP_INSECURE` → plaintext transport
    /// - `OTEL_EXPORTER_OTLP_TIMEOUT` → request timeout in milliseconds
    /// - `OTEL_SERVICE_NAME` → service name
    /// - `OTEL_METRIC_EXPORT_INTERVAL` → metric export interval in milliseconds
    /// - `OTEL_BSP_SCHEDULE_DELAY` → span batch delay in milliseconds
    pub fn with_standard_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.url", endpoint));
        }

        if let Ok(protocol) = std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            let protocol = match protocol.as_str() {
                "http/protobuf" => Protocol::HttpBinary,
                "http/json" => Protocol::HttpJson,
                _ => Protocol::Grpc,
            };
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.protocol", protocol.as_key()));
        }

        if let Ok(insecure) = std::env::var("OTEL_EXPORTER_OTLP_INSECURE") {
            let insecure = insecure.eq_ignore_ascii_case("true");
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.insecure", insecure));
        }

        if let Some(timeout) = env_millis("OTEL_EXPORTER_OTLP_TIMEOUT") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.timeout", timeout));
        }

        if let Ok(service_name) = std::env::var("OTEL_SERVICE_NAME") {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.service_name", service_name));
        }

        if let Some(interval) = env_millis("OTEL_METRIC_EXPORT_INTERVAL") {
            self.figment = self
                .figment
                .merge(Serialized::default("metrics.export_interval", interval));
        }

        if let Some(delay) = env_millis("OTEL_BSP_SCHEDULE_DELAY") {
            self.figment = self
                .figment
                .merge(Serialized::default("traces.batch.scheduled_delay", delay));
        }

        self
    }

    /// Sets the collector address, either `host:port` or an http(s) URL.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.url", url.into()));
        self
    }

    /// Sets the export protocol.
    ///
    /// The default address changes with the protocol:
    /// - `Protocol::Grpc` → `localhost:4317`
    /// - `Protocol::HttpBinary` / `Protocol::HttpJson` → `localhost:4318`
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.protocol", protocol.as_key()));
        self
    }

    /// Selects plaintext (`true`) or TLS (`false`) transport for bare addresses.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.insecure", insecure));
        self
    }

    /// Adds a header (gRPC metadata entry) to every export request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let header_key = format!("endpoint.headers.{}", key.into());
        self.figment = self
            .figment
            .merge(Serialized::default(&header_key, value.into()));
        self
    }

    /// Sets the `service.name` resource attribute.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("resource.service_name", name.into()));
        self
    }

    /// Sets the `service.version` resource attribute.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "resource.service_version",
            version.into(),
        ));
        self
    }

    /// Adds a resource attribute.
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let attribute_key = format!("resource.attributes.{}", key.into());
        self.figment = self
            .figment
            .merge(Serialized::default(&attribute_key, value.into()));
        self
    }

    /// Sets the metric export interval.
    pub fn export_interval(mut self, interval: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "metrics.export_interval",
            humantime_string(interval),
        ));
        self
    }

    /// Sets the counter instrument's name, description, and unit.
    pub fn counter(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("counter.name", name.into()))
            .merge(Serialized::default("counter.description", description.into()))
            .merge(Serialized::default("counter.unit", unit.into()));
        self
    }

    /// Sets the name of the span opened around the workload.
    pub fn span_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("workload.span_name", name.into()));
        self
    }

    /// Sets how long the workload holds its span open.
    pub fn hold(mut self, hold: Duration) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("workload.hold", humantime_string(hold)));
        self
    }

    /// Sets what happens to buffered telemetry when the run ends.
    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        let policy = match policy {
            ExitPolicy::Flush => "flush",
            ExitPolicy::Abandon => "abandon",
        };
        self.figment = self
            .figment
            .merge(Serialized::default("exit_policy", policy));
        self
    }

    /// Disables installation of the `tracing` subscriber.
    ///
    /// The subscriber can only be installed once per process, so embedders
    /// that configure their own should turn this off.
    pub fn without_tracing_subscriber(mut self) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("init_tracing_subscriber", false));
        self
    }

    /// Sets the instrumentation scope name used by the tracer and meter.
    pub fn instrumentation_scope_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "instrumentation_scope_name",
            name.into(),
        ));
        self
    }

    /// Extracts the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails or if the endpoint is invalid.
    pub fn extract_config(&self) -> Result<SmokeConfig, SmokeError> {
        let config: SmokeConfig = self
            .figment
            .extract()
            .map_err(|e| SmokeError::Config(Box::new(e)))?;

        config.endpoint.resolved_url()?;

        Ok(config)
    }

    /// Builds both pipelines with OTLP exporters.
    ///
    /// The gRPC exporter needs a Tokio runtime context to be entered on the
    /// calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails, an exporter cannot
    /// be created, or the tracing subscriber is already installed.
    pub fn build(self) -> Result<Telemetry, SmokeError> {
        let config = self.extract_config()?;
        Telemetry::from_config(&config)
    }

    /// Builds both pipelines around caller-provided exporters.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails or the tracing
    /// subscriber is already installed.
    pub fn build_with_exporters<S, M>(
        self,
        span_exporter: S,
        metric_exporter: M,
    ) -> Result<Telemetry, SmokeError>
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
    {
        let config = self.extract_config()?;
        Telemetry::with_exporters(&config, span_exporter, metric_exporter)
    }
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_millis(name: &str) -> Option<String> {
    let millis = std::env::var(name).ok()?.trim().parse::<u64>().ok()?;
    Some(humantime_string(Duration::from_millis(millis)))
}

fn humantime_string(duration: Duration) -> String {
    humantime_serde::re::humantime::format_duration(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let config = TelemetryBuilder::new().extract_config().unwrap();

        assert_eq!(config.endpoint.protocol, Protocol::Grpc);
        assert_eq!(config.endpoint.address(), "localhost:4317");
        assert_eq!(config.resource.service_name, "test-otel-python");
        assert_eq!(config.metrics.export_interval, Duration::from_secs(5));
        assert_eq!(config.workload.hold, Duration::from_secs(1));
        assert!(config.init_tracing_subscriber);
    }

    #[test]
    fn test_builder_endpoint() {
        let config = TelemetryBuilder::new()
            .endpoint("collector:4317")
            .extract_config()
            .unwrap();

        assert_eq!(config.endpoint.url.as_deref(), Some("collector:4317"));
    }

    #[test]
    fn test_builder_protocol_changes_default_address() {
        let config = TelemetryBuilder::new()
            .protocol(Protocol::HttpJson)
            .extract_config()
            .unwrap();

        assert_eq!(config.endpoint.protocol, Protocol::HttpJson);
        assert_eq!(config.endpoint.address(), "localhost:4318");
    }

    #[test]
    fn test_builder_insecure() {
        let config = TelemetryBuilder::new()
            .insecure(false)
            .extract_config()
            .unwrap();

        assert!(!config.endpoint.insecure);
        assert_eq!(
            config.endpoint.resolved_url().unwrap(),
            "https://localhost:4317"
        );
    }

    #[test]
    fn test_builder_resource() {
        let config = TelemetryBuilder::new()
            .service_name("checkout")
            .service_version("1.2.3")
            .resource_attribute("team", "platform")
            .extract_config()
            .unwrap();

        assert_eq!(config.resource.service_name, "checkout");
        assert_eq!(config.resource.service_version.as_deref(), Some("1.2.3"));
        assert_eq!(
            config.resource.attributes.get("team").map(String::as_str),
            Some("platform")
        );
    }

    #[test]
    fn test_builder_counter_and_workload() {
        let config = TelemetryBuilder::new()
            .counter("requests_total", "Requests handled", "{request}")
            .span_name("probe")
            .hold(Duration::from_millis(250))
            .export_interval(Duration::from_millis(1500))
            .extract_config()
            .unwrap();

        assert_eq!(config.counter.name, "requests_total");
        assert_eq!(config.counter.description, "Requests handled");
        assert_eq!(config.counter.unit, "{request}");
        assert_eq!(config.workload.span_name, "probe");
        assert_eq!(config.workload.hold, Duration::from_millis(250));
        assert_eq!(config.metrics.export_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_builder_exit_policy() {
        let config = TelemetryBuilder::new()
            .exit_policy(ExitPolicy::Abandon)
            .extract_config()
            .unwrap();

        assert_eq!(config.exit_policy, ExitPolicy::Abandon);
    }

    #[test]
    fn test_builder_without_tracing_subscriber() {
        let config = TelemetryBuilder::new()
            .without_tracing_subscriber()
            .extract_config()
            .unwrap();

        assert!(!config.init_tracing_subscriber);
    }

    #[test]
    fn test_builder_header() {
        let config = TelemetryBuilder::new()
            .header("authorization", "Bearer token123")
            .extract_config()
            .unwrap();

        assert_eq!(
            config.endpoint.headers.get("authorization"),
            Some(&"Bearer token123".to_string())
        );
    }

    #[test]
    fn test_with_standard_env_endpoint_and_protocol() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://collector:4318")),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", Some("http/protobuf")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_standard_env()
                    .extract_config()
                    .unwrap();
                assert_eq!(
                    config.endpoint.url.as_deref(),
                    Some("http://collector:4318")
                );
                assert_eq!(config.endpoint.protocol, Protocol::HttpBinary);
            },
        );
    }

    #[test]
    fn test_with_standard_env_service_name() {
        temp_env::with_var("OTEL_SERVICE_NAME", Some("env-service"), || {
            let config = TelemetryBuilder::new()
                .with_standard_env()
                .extract_config()
                .unwrap();
            assert_eq!(config.resource.service_name, "env-service");
        });
    }

    #[test]
    fn test_with_standard_env_intervals() {
        temp_env::with_vars(
            [
                ("OTEL_METRIC_EXPORT_INTERVAL", Some("2500")),
                ("OTEL_BSP_SCHEDULE_DELAY", Some("100")),
                ("OTEL_EXPORTER_OTLP_TIMEOUT", Some("3000")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_standard_env()
                    .extract_config()
                    .unwrap();
                assert_eq!(config.metrics.export_interval, Duration::from_millis(2500));
                assert_eq!(
                    config.traces.batch.scheduled_delay,
                    Duration::from_millis(100)
                );
                assert_eq!(config.endpoint.timeout, Duration::from_secs(3));
            },
        );
    }

    #[test]
    fn test_with_standard_env_ignores_unparseable_interval() {
        temp_env::with_var("OTEL_METRIC_EXPORT_INTERVAL", Some("soon"), || {
            let config = TelemetryBuilder::new()
                .with_standard_env()
                .extract_config()
                .unwrap();
            assert_eq!(config.metrics.export_interval, Duration::from_secs(5));
        });
    }

    #[test]
    fn test_with_standard_env_insecure_false() {
        temp_env::with_var("OTEL_EXPORTER_OTLP_INSECURE", Some("false"), || {
            let config = TelemetryBuilder::new()
                .with_standard_env()
                .extract_config()
                .unwrap();
            assert!(!config.endpoint.insecure);
        });
    }

    #[test]
    fn test_with_prefixed_env_nested_keys() {
        temp_env::with_vars(
            [
                ("OTLP_SMOKE_TEST_WORKLOAD__SPAN_NAME", Some("env-span")),
                ("OTLP_SMOKE_TEST_EXIT_POLICY", Some("abandon")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_env("OTLP_SMOKE_TEST_")
                    .extract_config()
                    .unwrap();
                assert_eq!(config.workload.span_name, "env-span");
                assert_eq!(config.exit_policy, ExitPolicy::Abandon);
            },
        );
    }

    #[test]
    fn test_programmatic_overrides_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("env:4317")),
                ("OTEL_SERVICE_NAME", Some("env-service")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_standard_env()
                    .endpoint("programmatic:4317")
                    .service_name("programmatic-service")
                    .extract_config()
                    .unwrap();

                assert_eq!(config.endpoint.url.as_deref(), Some("programmatic:4317"));
                assert_eq!(config.resource.service_name, "programmatic-service");
            },
        );
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let config = TelemetryBuilder::new()
            .with_file("/nonexistent/otlp-smoke.toml")
            .extract_config()
            .unwrap();

        assert_eq!(config.resource.service_name, "test-otel-python");
    }

    #[test]
    fn test_example_config_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("otlp-smoke.example.toml");
        let config = TelemetryBuilder::new()
            .with_file(path)
            .extract_config()
            .unwrap();

        assert_eq!(config.endpoint.address(), "localhost:4317");
        assert_eq!(config.endpoint.protocol, Protocol::Grpc);
        assert_eq!(config.metrics.export_interval, Duration::from_millis(5000));
        assert_eq!(config.exit_policy, ExitPolicy::Flush);
        assert_eq!(
            config.workload.attributes.get("env").map(String::as_str),
            Some("test")
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = TelemetryBuilder::new()
            .endpoint("not-a-valid-endpoint")
            .extract_config();

        let err = result.unwrap_err();
        assert!(
            matches!(err, SmokeError::InvalidEndpoint { ref url } if url == "not-a-valid-endpoint"),
            "Expected InvalidEndpoint error, got: {:?}",
            err
        );
    }

    #[test]
    fn test_build_with_exporters_uses_layered_config() {
        let telemetry = TelemetryBuilder::new()
            .service_name("builder-test")
            .exit_policy(ExitPolicy::Abandon)
            .without_tracing_subscriber()
            .build_with_exporters(
                opentelemetry_sdk::trace::InMemorySpanExporter::default(),
                opentelemetry_sdk::metrics::InMemoryMetricExporter::default(),
            )
            .unwrap();

        assert_eq!(telemetry.exit_policy(), ExitPolicy::Abandon);
        assert_eq!(
            telemetry
                .resource()
                .get(&opentelemetry::Key::from_static_str("service.name")),
            Some(opentelemetry::Value::from("builder-test"))
        );
        telemetry.abandon();
    }
}
