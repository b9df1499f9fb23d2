//! Configuration types for the smoke test.
//!
//! These types are deserialised with figment so they can be layered from
//! compiled defaults, a TOML file, and environment variables.

use crate::error::SmokeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Service name used when nothing else is configured.
pub const DEFAULT_SERVICE_NAME: &str = "test-otel-python";

/// OTLP export protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// gRPC protocol (default port 4317).
    #[default]
    Grpc,
    /// HTTP with Protocol Buffers encoding (default port 4318).
    #[serde(alias = "http_binary", alias = "http-binary")]
    HttpBinary,
    /// HTTP with JSON encoding (default port 4318).
    #[serde(alias = "http_json", alias = "http-json")]
    HttpJson,
}

impl Protocol {
    /// Returns the default collector address for this protocol.
    #[must_use]
    pub fn default_address(&self) -> &'static str {
        match self {
            Protocol::Grpc => "localhost:4317",
            Protocol::HttpBinary | Protocol::HttpJson => "localhost:4318",
        }
    }

    pub(crate) fn as_key(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpBinary => "httpbinary",
            Protocol::HttpJson => "httpjson",
        }
    }
}

/// What happens to buffered telemetry when the run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// Flush and shut down both providers before exiting.
    #[default]
    Flush,
    /// Leave buffered spans and metric points behind. Anything not yet
    /// exported by the background processors is lost.
    Abandon,
}

/// Complete smoke test configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Collector endpoint.
    pub endpoint: EndpointConfig,

    /// Resource attached to every span and metric.
    pub resource: ResourceConfig,

    /// Trace pipeline.
    pub traces: TracesConfig,

    /// Metric pipeline.
    pub metrics: MetricsConfig,

    /// Counter instrument metadata.
    pub counter: CounterConfig,

    /// The work done inside the span.
    pub workload: WorkloadConfig,

    /// Behaviour at the end of the run.
    pub exit_policy: ExitPolicy,

    /// Whether to install the `tracing` subscriber.
    pub init_tracing_subscriber: bool,

    /// Instrumentation scope for the tracer and meter.
    /// Defaults to the service name.
    pub instrumentation_scope_name: Option<String>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            resource: ResourceConfig::default(),
            traces: TracesConfig::default(),
            metrics: MetricsConfig::default(),
            counter: CounterConfig::default(),
            workload: WorkloadConfig::default(),
            exit_policy: ExitPolicy::default(),
            init_tracing_subscriber: true,
            instrumentation_scope_name: None,
        }
    }
}

impl SmokeConfig {
    /// Returns the endpoint URL for a signal, with scheme resolved and the
    /// signal path appended for HTTP protocols.
    ///
    /// # Errors
    ///
    /// Returns [`SmokeError::InvalidEndpoint`] if the configured address is
    /// malformed.
    pub fn signal_endpoint(&self, signal_path: &str) -> Result<String, SmokeError> {
        let base = self.endpoint.resolved_url()?;
        let base = base.trim_end_matches('/');

        Ok(match self.endpoint.protocol {
            Protocol::Grpc => base.to_string(),
            Protocol::HttpBinary | Protocol::HttpJson => format!("{base}{signal_path}"),
        })
    }

    /// Returns the instrumentation scope name for the tracer and meter.
    #[must_use]
    pub fn scope_name(&self) -> String {
        self.instrumentation_scope_name
            .clone()
            .unwrap_or_else(|| self.resource.service_name.clone())
    }
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Collector address, either `host:port` or a full `http://` / `https://` URL.
    ///
    /// If not specified, uses the protocol's default address.
    pub url: Option<String>,

    /// Export protocol.
    pub protocol: Protocol,

    /// Plaintext transport. Decides the scheme of a bare `host:port` address.
    pub insecure: bool,

    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Headers (gRPC metadata) added to every export request.
    pub headers: HashMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            protocol: Protocol::default(),
            insecure: true,
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

impl EndpointConfig {
    /// Returns the collector address as configured, falling back to the
    /// protocol default.
    #[must_use]
    pub fn address(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_address())
    }

    /// Resolves the address to a URL.
    ///
    /// An explicit `http://` or `https://` scheme is kept as is. A bare
    /// `host:port` gets `http://` when insecure and `https://` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SmokeError::InvalidEndpoint`] for any other scheme, or a
    /// bare address without a host and numeric port.
    pub fn resolved_url(&self) -> Result<String, SmokeError> {
        let address = self.address();

        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(address.to_string());
        }

        let invalid = || SmokeError::InvalidEndpoint {
            url: address.to_string(),
        };

        if address.contains("://") {
            return Err(invalid());
        }

        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }

        let scheme = if self.insecure { "http" } else { "https" };
        Ok(format!("{scheme}://{address}"))
    }
}

/// Resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Service name.
    pub service_name: String,

    /// Service version.
    pub service_version: Option<String>,

    /// Additional resource attributes.
    pub attributes: HashMap<String, String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            attributes: HashMap::new(),
        }
    }
}

/// Trace pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Batch span processor tuning.
    pub batch: BatchConfig,
}

/// Batch span processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum queue size.
    pub max_queue_size: usize,

    /// Maximum batch size for export.
    pub max_export_batch_size: usize,

    /// Scheduled delay between exports.
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

/// Metric pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How often the periodic reader collects and exports.
    #[serde(with = "humantime_serde")]
    pub export_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            export_interval: Duration::from_millis(5000),
        }
    }
}

/// Counter instrument metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Instrument name.
    pub name: String,

    /// Instrument description.
    pub description: String,

    /// Unit of measure.
    pub unit: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            name: "example_counter".to_string(),
            description: "An example counter".to_string(),
            unit: "1".to_string(),
        }
    }
}

/// The simulated work performed inside the span.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Name of the span.
    pub span_name: String,

    /// Amount added to the counter.
    pub increment: u64,

    /// Attributes recorded with the increment.
    pub attributes: BTreeMap<String, String>,

    /// How long the span stays open.
    #[serde(with = "humantime_serde")]
    pub hold: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            span_name: "test-span".to_string(),
            increment: 1,
            attributes: BTreeMap::from([("env".to_string(), "test".to_string())]),
            hold: Duration::from_secs(1),
        }
    }
}
