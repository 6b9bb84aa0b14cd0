use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::{
    config::LoggingConfig,
    errors::{InitializationError, ModbusError},
};

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let mut env_filter = EnvFilter::default().add_directive(config.get_level_filter().into());

    // If trace_frames is enabled, add more specific filtering
    if config.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_link::transport=trace".parse().unwrap())
            .add_directive("modbus_link::server=trace".parse().unwrap());
    }

    env_filter
}

/// Initialises the global tracing subscriber.
///
/// Returns the appender guard when file logging is enabled; dropping it
/// flushes and stops the writer thread.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ModbusError> {
    config.validate().map_err(ModbusError::Init)?;

    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_level(true)
        .with_timer(timer.clone());

    let console: Box<dyn Layer<Registry> + Send + Sync> =
        if config.format.eq_ignore_ascii_case("json") {
            console.json().with_filter(build_filter(config)).boxed()
        } else {
            console.with_filter(build_filter(config)).boxed()
        };

    let mut layers = vec![console];
    let mut guard = None;
    if let Some(log_dir) = config.log_dir.as_deref() {
        let appender = tracing_appender::rolling::daily(log_dir, "modbus-link.log");
        let (writer, appender_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_timer(timer)
                .with_writer(writer)
                .with_filter(build_filter(config))
                .boxed(),
        );
        guard = Some(appender_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| ModbusError::Init(InitializationError::subscriber(e.to_string())))?;

    Ok(guard)
}
