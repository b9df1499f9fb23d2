//! The smoke run: one span around one counter increment.

use crate::config::SmokeConfig;
use crate::error::SmokeError;
use crate::instrument::key_values;
use crate::telemetry::Telemetry;
use std::io::Write;

/// Printed once the span is open.
pub const SENDING_MESSAGE: &str = "Sending a test span and metric...";

/// Printed after the span has closed.
pub const DONE_MESSAGE: &str = "Done. Check your Grafana/Tempo/Prometheus/Loki dashboards.";

/// Creates the counter, then inside one span prints [`SENDING_MESSAGE`],
/// adds the configured increment, and holds the span open. Prints
/// [`DONE_MESSAGE`] after the span ends.
///
/// Delivery is not checked: the span and metric point are handed to the
/// background processors and exported whenever they next run.
pub fn run<W: Write>(
    telemetry: &Telemetry,
    config: &SmokeConfig,
    out: &mut W,
) -> Result<(), SmokeError> {
    let counter = telemetry.counter(&config.counter)?;
    let workload = &config.workload;
    let attributes = key_values(&workload.attributes);

    telemetry.in_span(workload.span_name.clone(), |_cx| -> Result<(), SmokeError> {
        writeln!(out, "{SENDING_MESSAGE}")?;
        out.flush()?;

        counter.add(workload.increment, &attributes);
        std::thread::sleep(workload.hold);
        Ok(())
    })?;

    tracing::debug!(
        target: "otlp_lifecycle",
        span = %workload.span_name,
        counter = counter.name(),
        increment = workload.increment,
        "span closed"
    );

    writeln!(out, "{DONE_MESSAGE}")?;
    out.flush()?;
    Ok(())
}
