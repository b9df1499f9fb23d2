use otlp_smoke::{ExitPolicy, SmokeError, Telemetry, TelemetryBuilder, emit};

/// Optional configuration file, read from the working directory.
const CONFIG_FILE: &str = "otlp-smoke.toml";

/// Prefix for environment overrides, e.g. `OTLP_SMOKE_WORKLOAD__SPAN_NAME`.
const ENV_PREFIX: &str = "OTLP_SMOKE_";

fn main() -> Result<(), SmokeError> {
    // The gRPC exporters need a reactor; the smoke run itself stays on this thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SmokeError::Runtime)?;
    let _entered = runtime.enter();

    let config = TelemetryBuilder::new()
        .with_file(CONFIG_FILE)
        .with_standard_env()
        .with_env(ENV_PREFIX)
        .extract_config()?;

    let telemetry = Telemetry::from_config(&config)?;

    let mut stdout = std::io::stdout().lock();
    emit::run(&telemetry, &config, &mut stdout)?;

    match config.exit_policy {
        ExitPolicy::Flush => telemetry.shutdown()?,
        ExitPolicy::Abandon => telemetry.abandon(),
    }

    Ok(())
}
