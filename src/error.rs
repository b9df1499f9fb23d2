//! Error types for pipeline setup, emission, and lifecycle.

use figment::Error as FigmentError;

/// Errors from building the telemetry pipelines and running the smoke test.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SmokeError {
    /// Failed to extract configuration from sources.
    #[error("configuration error: {0}")]
    Config(#[source] Box<FigmentError>),

    /// The collector endpoint is neither `host:port` nor an http(s) URL.
    #[error("invalid endpoint: {url} (expected host:port, http:// or https://)")]
    InvalidEndpoint {
        /// The endpoint that was provided.
        url: String,
    },

    /// Failed to create trace exporter.
    #[error("failed to create trace exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create metric exporter.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to initialise tracing subscriber.
    #[error("failed to initialise tracing subscriber")]
    TracingSubscriber(#[from] tracing_subscriber::util::TryInitError),

    /// Failed to start the async runtime the gRPC exporters run on.
    #[error("failed to start async runtime")]
    Runtime(#[source] std::io::Error),

    /// The instrument name is not accepted by the metrics SDK.
    #[error("invalid instrument name: {name:?}")]
    InvalidInstrument {
        /// The rejected name.
        name: String,
    },

    /// A counter was asked to go down.
    #[error("counter increments must be non-negative, got {value}")]
    NegativeIncrement {
        /// The rejected increment.
        value: i64,
    },

    /// Failed to write progress output.
    #[error("failed to write output")]
    Output(#[from] std::io::Error),

    /// Failed to flush providers.
    #[error("failed to flush providers")]
    Flush(#[source] opentelemetry_sdk::error::OTelSdkError),

    /// Failed to shut down providers.
    #[error("failed to shut down providers")]
    Shutdown(#[source] opentelemetry_sdk::error::OTelSdkError),
}
