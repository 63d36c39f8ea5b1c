use std::fmt::Result as FmtResult;

use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext,
        format::{FormatEvent, FormatFields, Writer},
    },
    registry::LookupSpan,
};

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// One line per event: `time LEVEL module > message`.
///
/// The crate prefix is stripped from targets so node and player lines stay
/// short.
pub struct PegasusFormatter {
    ansi: bool,
}

impl PegasusFormatter {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }

    fn paint<'a>(&self, code: &'a str) -> &'a str {
        if self.ansi { code } else { "" }
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[1;31m",
        Level::WARN => "\x1b[1;33m",
        Level::INFO => "\x1b[1;32m",
        Level::DEBUG => "\x1b[1;34m",
        Level::TRACE => "\x1b[1;35m",
    }
}

fn short_target(target: &str) -> &str {
    target.strip_prefix("pegasus::").unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for PegasusFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> FmtResult {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let timestamp = now.format(TIMESTAMP).unwrap_or_default();
        let metadata = event.metadata();

        write!(
            writer,
            "{}{}{} {}{:<5}{} {}{} >{} ",
            self.paint(DIM),
            timestamp,
            self.paint(RESET),
            self.paint(level_color(metadata.level())),
            metadata.level(),
            self.paint(RESET),
            self.paint(DIM),
            short_target(metadata.target()),
            self.paint(RESET),
        )?;

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
