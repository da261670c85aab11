//! Console and batch-log output for the drivers.
//!
//! The console shows bare messages coloured by level so echoed command lines
//! stay copy-pastable. A sweep additionally mirrors every event, with
//! timestamps and levels, into `<out>/sweep.log`.

use anyhow::{Context, Result};
use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Formats events as a single coloured line without timestamps or targets.
///
/// Warnings and errors keep a short level tag so they stand out in a long
/// sweep transcript.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
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
        // format_fields writes directly, so buffer to colour the whole line.
        let mut buffer = String::new();
        ctx.format_fields(Writer::new(&mut buffer), event)?;

        let line = match *event.metadata().level() {
            Level::INFO => buffer.normal(),
            Level::WARN => format!("warning: {}", buffer).yellow(),
            Level::ERROR => format!("error: {}", buffer).red().bold(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", line)
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the level chosen by `verbose`. When `log_file` is set
/// its parent directory must exist; the returned guard flushes the file when
/// dropped and must be held until the program exits.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console = tracing_subscriber::fmt::layer().event_format(ColorizedFormatter);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter(verbose))
            .with(console)
            .try_init()
            .context("Failed to install logger")?;
        return Ok(None);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .context("Batch log path has no file name")?;
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install logger")?;
    Ok(Some(guard))
}
