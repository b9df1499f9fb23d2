//! Smoke test for an OTLP observability stack.
//!
//! Builds a trace pipeline and a metric pipeline over one shared resource,
//! opens a single span, bumps a single counter inside it, and exits. Useful to
//! check that a collector and its dashboards are wired up end to end.
//!
//! # Example
//!
//! ```no_run
//! use otlp_smoke::{SmokeError, TelemetryBuilder, emit};
//!
//! fn main() -> Result<(), SmokeError> {
//!     let runtime = tokio::runtime::Runtime::new().map_err(SmokeError::Runtime)?;
//!     let _entered = runtime.enter();
//!
//!     let builder = TelemetryBuilder::new().with_standard_env();
//!     let config = builder.extract_config()?;
//!     let telemetry = otlp_smoke::Telemetry::from_config(&config)?;
//!
//!     emit::run(&telemetry, &config, &mut std::io::stdout())?;
//!     telemetry.shutdown()
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
pub mod emit;
mod error;
mod instrument;
mod pipeline;
mod telemetry;

pub use builder::TelemetryBuilder;
pub use config::{
    BatchConfig, CounterConfig, DEFAULT_SERVICE_NAME, EndpointConfig, ExitPolicy, MetricsConfig,
    Protocol, ResourceConfig, SmokeConfig, TracesConfig, WorkloadConfig,
};
pub use error::SmokeError;
pub use instrument::{MonotonicCounter, key_values};
pub use telemetry::Telemetry;

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;

/// Re-exported for users who want to construct custom configuration providers.
pub use figment;
