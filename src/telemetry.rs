//! The telemetry context: both providers, their shared resource, and their
//! lifecycle.
//!
//! [`Telemetry`] is built once and passed by reference to whatever emits
//! spans or metrics. Nothing is registered globally.

use crate::config::{CounterConfig, ExitPolicy, SmokeConfig};
use crate::error::SmokeError;
use crate::instrument::MonotonicCounter;
use crate::pipeline;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::{Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, InstrumentationScope};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, SpanExporter};
use std::borrow::Cow;
use std::fmt::Display;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Owns the trace and metric pipelines.
///
/// On drop, applies the configured [`ExitPolicy`]. Use
/// [`shutdown()`](Self::shutdown) to see flush and shutdown errors.
pub struct Telemetry {
    resource: Resource,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    tracer: SdkTracer,
    meter: Meter,
    exit_policy: ExitPolicy,
}

impl Telemetry {
    /// Builds both pipelines with OTLP exporters for the configured endpoint.
    ///
    /// For gRPC the calling thread must be inside a Tokio runtime context.
    pub fn from_config(config: &SmokeConfig) -> Result<Self, SmokeError> {
        let span_exporter = pipeline::otlp_span_exporter(config)?;
        let metric_exporter = pipeline::otlp_metric_exporter(config)?;

        let telemetry = Self::with_exporters(config, span_exporter, metric_exporter)?;

        tracing::info!(
            target: "otlp_lifecycle",
            endpoint = %config.endpoint.address(),
            protocol = ?config.endpoint.protocol,
            insecure = config.endpoint.insecure,
            "OTLP exporters configured"
        );

        Ok(telemetry)
    }

    /// Builds both pipelines around caller-provided exporters.
    pub fn with_exporters<S, M>(
        config: &SmokeConfig,
        span_exporter: S,
        metric_exporter: M,
    ) -> Result<Self, SmokeError>
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
    {
        let resource = pipeline::build_resource(config);

        let tracer_provider =
            pipeline::tracer_provider(span_exporter, &config.traces.batch, resource.clone());
        let meter_provider = pipeline::meter_provider(
            metric_exporter,
            config.metrics.export_interval,
            resource.clone(),
        );

        let scope_name = config.scope_name();
        let tracer = tracer_provider.tracer(scope_name.clone());
        let meter =
            meter_provider.meter_with_scope(InstrumentationScope::builder(scope_name.clone()).build());

        if config.init_tracing_subscriber {
            init_subscriber(&tracer_provider, scope_name)?;
        }

        tracing::info!(
            target: "otlp_lifecycle",
            service_name = %config.resource.service_name,
            export_interval = ?config.metrics.export_interval,
            "telemetry pipelines installed"
        );

        Ok(Self {
            resource,
            tracer_provider: Some(tracer_provider),
            meter_provider: Some(meter_provider),
            tracer,
            meter,
            exit_policy: config.exit_policy,
        })
    }

    /// The resource attached to both providers.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The exit policy applied on drop.
    pub fn exit_policy(&self) -> ExitPolicy {
        self.exit_policy
    }

    /// Creates the counter described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SmokeError::InvalidInstrument`] if the SDK would not accept
    /// the name.
    pub fn counter(&self, config: &CounterConfig) -> Result<MonotonicCounter, SmokeError> {
        MonotonicCounter::new(&self.meter, config)
    }

    /// Runs `f` inside a span named `name`, made current for the duration.
    ///
    /// The span ends when this returns, on error, or while unwinding, and is
    /// then queued for export. An `Err` from `f` sets the span status to error.
    pub fn in_span<T, E, F>(&self, name: impl Into<Cow<'static, str>>, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce(&Context) -> Result<T, E>,
    {
        let span = self.tracer.start(name);
        let cx = Context::current_with_span(span);
        let _attached = cx.clone().attach();

        let result = f(&cx);
        if let Err(e) = &result {
            cx.span().set_status(Status::error(e.to_string()));
        }
        result
    }

    /// Exports whatever both providers hold right now. Errors are logged but
    /// not returned.
    ///
    /// Metrics use cumulative temporality, so a later shutdown exports the
    /// counter's running total again as a new point.
    pub fn flush(&self) {
        if let Some(provider) = &self.tracer_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otlp_lifecycle", error = %e, "Failed to flush tracer provider");
        }

        if let Some(provider) = &self.meter_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otlp_lifecycle", error = %e, "Failed to flush meter provider");
        }
    }

    /// Exports everything still buffered and closes both pipelines.
    ///
    /// Both providers are closed even if the first one fails; the first
    /// error is returned.
    pub fn shutdown(mut self) -> Result<(), SmokeError> {
        self.close()
    }

    /// Walks away from both providers without flushing.
    ///
    /// Whatever the batch processor and periodic reader have not exported yet
    /// is lost once the process exits.
    pub fn abandon(mut self) {
        self.exit_policy = ExitPolicy::Abandon;
    }

    fn close(&mut self) -> Result<(), SmokeError> {
        let traces = match self.tracer_provider.take() {
            Some(provider) => provider
                .force_flush()
                .map_err(SmokeError::Flush)
                .and(provider.shutdown().map_err(SmokeError::Shutdown)),
            None => Ok(()),
        };

        // The periodic reader collects and exports one last time on shutdown.
        let metrics = match self.meter_provider.take() {
            Some(provider) => provider.shutdown().map_err(SmokeError::Shutdown),
            None => Ok(()),
        };

        let closed = traces.and(metrics);
        if closed.is_ok() {
            tracing::debug!(target: "otlp_lifecycle", "telemetry pipelines shut down");
        }
        closed
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        match self.exit_policy {
            ExitPolicy::Flush => {
                if let Err(e) = self.close() {
                    tracing::error!(target: "otlp_lifecycle", error = %e, "Failed to close telemetry pipelines");
                }
            }
            ExitPolicy::Abandon => {
                tracing::debug!(target: "otlp_lifecycle", "abandoning buffered telemetry");
                // Dropping the last provider handle would shut it down and
                // flush, so leak them instead.
                std::mem::forget(self.tracer_provider.take());
                std::mem::forget(self.meter_provider.take());
            }
        }
    }
}

fn init_subscriber(tracer_provider: &SdkTracerProvider, scope_name: String) -> Result<(), SmokeError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the progress lines, so diagnostics go to stderr.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr);

    let telemetry_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(scope_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()?;

    Ok(())
}
