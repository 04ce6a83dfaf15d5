//! Stderr logging in the exact line shape spec.md §6 requires:
//! `YYYY-MM-DD HH:MM:SS | LEVEL(8) | module(30) | event_type=<id> k=v …`
//!
//! Built on `tracing`/`tracing-subscriber` the way the teacher's
//! `telemetry` module wires an `EnvFilter` + `fmt` layer; here the `fmt`
//! layer's event formatter is replaced with `SpecLineFormatter` so log
//! lines match the contract byte-for-byte instead of tracing's default
//! shape.

use std::fmt;

use time::OffsetDateTime;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

/// Event IDs the core emits, per spec.md §6. Kept as an enum (rather than
/// bare `&str` at call sites) so a typo in an event name is a compile
/// error, not a silent logging gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    RetryAttempt,
    RetryExhausted,
    LocatorNotFound,
    StateRecorded,
    BudgetHit,
    DraftWritten,
}

impl EventId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventId::RetryAttempt => "retry_attempt",
            EventId::RetryExhausted => "retry_exhausted",
            EventId::LocatorNotFound => "locator_not_found",
            EventId::StateRecorded => "state_recorded",
            EventId::BudgetHit => "budget_hit",
            EventId::DraftWritten => "draft_written",
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Renders one tracing event as `TS | LEVEL(8) | module(30) | fields`.
pub struct SpecLineFormatter;

impl<S, N> FormatEvent<S, N> for SpecLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let now = OffsetDateTime::now_utc();
        write!(
            writer,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} | ",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        )?;

        let level = event.metadata().level().to_string();
        write!(writer, "{level:<8} | ")?;

        let module = event.metadata().target();
        let module = if module.len() > 30 {
            &module[module.len() - 30..]
        } else {
            module
        };
        write!(writer, "{module:<30} | ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global stderr subscriber. Safe to call once per process;
/// the CLI binary calls this before dispatching a mode.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(SpecLineFormatter);

    let subscriber = Registry::default().with(fmt_layer).with(env_filter);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_render_spec_names() {
        assert_eq!(EventId::RetryAttempt.as_str(), "retry_attempt");
        assert_eq!(EventId::BudgetHit.as_str(), "budget_hit");
        assert_eq!(EventId::DraftWritten.as_str(), "draft_written");
    }
}
