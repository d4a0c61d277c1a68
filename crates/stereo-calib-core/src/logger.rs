//! Logging setup for the calibration tools.
//!
//! Records from the `stereo_calib*` crates are filtered at the pipeline
//! level chosen on the command line. Everything else (the corner detector,
//! the solver) is held at a separate, quieter level: their per-frame debug
//! output would otherwise bury the selection log at `-v`.
//!
//! [`init_with_level`] installs a stderr logger printing
//! `[elapsed LEVEL stage] message`; with the `tracing` feature,
//! [`init_tracing`] routes the same levels through a `tracing-subscriber`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const PIPELINE_PREFIX: &str = "stereo_calib";

/// Per-origin level filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevels {
    /// `stereo_calib*` crates.
    pub pipeline: LevelFilter,
    /// Detector, solver and any other dependency.
    pub dependencies: LevelFilter,
}

impl LogLevels {
    /// Dependencies follow `pipeline` up to `Warn`, and open up to `Debug`
    /// only when the pipeline traces.
    pub fn from_pipeline(pipeline: LevelFilter) -> Self {
        let dependencies = if pipeline == LevelFilter::Trace {
            LevelFilter::Debug
        } else {
            pipeline.min(LevelFilter::Warn)
        };
        Self {
            pipeline,
            dependencies,
        }
    }

    pub fn for_target(&self, target: &str) -> LevelFilter {
        if target.starts_with(PIPELINE_PREFIX) {
            self.pipeline
        } else {
            self.dependencies
        }
    }

    fn max(&self) -> LevelFilter {
        self.pipeline.max(self.dependencies)
    }

    /// `EnvFilter` directives equivalent to these levels.
    #[cfg(feature = "tracing")]
    fn directives(&self) -> String {
        format!(
            "{},{PIPELINE_PREFIX}={}",
            self.dependencies.as_str().to_ascii_lowercase(),
            self.pipeline.as_str().to_ascii_lowercase()
        )
    }
}

/// Pipeline stage of a record: the last module path segment.
fn stage(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

struct StageLogger {
    levels: LogLevels,
    started: Instant,
}

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.levels.for_target(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            stage(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StageLogger> = OnceLock::new();

/// Install the stderr logger; later calls keep the first configuration.
pub fn init_logger(levels: LogLevels) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StageLogger {
            levels,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(levels.max());
    }
    Ok(())
}

/// [`init_logger`] with [`LogLevels::from_pipeline`].
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    init_logger(LogLevels::from_pipeline(level))
}

/// Install a `tracing` subscriber and bridge `log` records into it.
///
/// `RUST_LOG`, when set, replaces `levels`. `json = true` emits one
/// flattened JSON object per event for unattended runs.
#[cfg(feature = "tracing")]
pub fn init_tracing(levels: LogLevels, json: bool) {
    let _ = tracing_log::LogTracer::init();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(levels.directives()));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
