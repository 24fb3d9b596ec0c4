//! Log sinks: human console output plus the append-only broker log file with
//! `[YYYY-MM-DD HH:MM:SS.mmm] LEVEL: <message>` lines that the operator
//! tooling scrapes.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Line format of the broker log file.
struct LogLine;

impl<S, N> FormatEvent<S, N> for LogLine
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        write!(writer, "[{timestamp}] {}: ", event.metadata().level())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the console layer and, when the file can be opened, the file
/// layer. A broken log file degrades to console-only operation; it never
/// takes the broker down. The returned guard flushes the file on drop.
pub fn init(log_path: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let console = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry().with(filter).with(console);

    match open_log_file(log_path) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .event_format(LogLine)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            tracing::info!("log file opened at {}", log_path.display());
            Some(guard)
        }
        Err(e) => {
            registry.init();
            tracing::error!("could not open log file {}: {e}", log_path.display());
            None
        }
    }
}
