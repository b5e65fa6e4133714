use std::path::Path;

use anyhow::Context;
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use time::UtcOffset;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_NAME: &str = "semacaulk-indexer.log";
const MAX_LOG_FILES: usize = 14;

/// Keeps the non-blocking writers flushing until dropped.
pub struct LogGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

/// Stdout plus a daily rolling file under `log_dir`, both filtered by `level` and stamped
/// with `local_offset`.
pub fn init_logging(
    log_dir: &Path,
    level: tracing::level_filters::LevelFilter,
    local_offset: UtcOffset,
) -> anyhow::Result<LogGuards> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let timer = OffsetTime::new(
        local_offset,
        format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
        ),
    );

    let (stdout_appender, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_subscriber = tracing_subscriber::fmt::layer()
        .with_timer(timer.clone())
        .with_writer(stdout_appender)
        .with_filter(level);

    let file_appender = BasicRollingFileAppender::new(
        log_dir.join(LOG_FILE_NAME),
        RollingConditionBasic::new().daily(),
        MAX_LOG_FILES,
    )
    .with_context(|| format!("opening log file in {}", log_dir.display()))?;
    let (file_appender, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_subscriber = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_ansi(false)
        .with_writer(file_appender)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(stdout_subscriber)
        .with(file_subscriber)
        .init();

    Ok(LogGuards {
        _stdout: stdout_guard,
        _file: file_guard,
    })
}
