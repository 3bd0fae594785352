//! Tracing subscriber setup.
//!
//! Console output always; a daily-rolling log file when a directory is
//! configured. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].

use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "notify_pipeline=info,sqlx=warn,tower_http=info";

/// File name prefix of the rolling log.
const LOG_FILE_PREFIX: &str = "notify-pipeline.log";

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Directory for the rolling log file; console only when unset.
    pub dir: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it alive
/// for the lifetime of the process or buffered lines are lost.
pub fn init_logging(config: &LogConfig) -> crate::Result<Option<WorkerGuard>> {
    let console = if config.json {
        fmt::layer().json().with_timer(LocalTimer).boxed()
    } else {
        fmt::layer().with_ansi(true).with_timer(LocalTimer).boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            let layer = if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}
