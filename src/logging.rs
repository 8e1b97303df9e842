//! Logging for ngpack
//!
//! Two things live here:
//!
//! - [`init`] installs the process-wide `tracing` subscriber used by the
//!   binary. Library code logs through `tracing` macros with the structured
//!   field names below.
//! - [`BuildLog`] is the collaborator transform pipelines report user-facing
//!   diagnostics through. Warnings are forwarded, never raised as errors.
//!
//! # Log Format Conventions
//!
//! - `service`: The component logging ("content_cache", "styles")
//! - `operation`: The operation being performed ("get", "put", "process")
//! - `status`: The result status ("success", "miss", "error")
//! - `key`: Content cache fingerprint
//! - `size_bytes`: Size in bytes
//!
//! ```rust
//! use tracing::debug;
//!
//! let key = "3f1a...";
//! debug!(
//!     service = "content_cache",
//!     operation = "get",
//!     status = "miss",
//!     key = %key,
//!     "cache miss"
//! );
//! ```

use std::{fmt as std_fmt, io};

use parking_lot::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter};

/// One line per event: local time, level tagged `(ngpack)`, then fields.
struct LevelTagFormatter {
    ansi: bool,
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for LevelTagFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let level = event.metadata().level();
        let time = chrono::Local::now().format("%H:%M:%S%.3f");

        if self.ansi {
            write!(writer, "{} {}{:5}(ngpack)\x1b[0m: ", time, level_color(level), level)?;
        } else {
            write!(writer, "{} {:5}(ngpack): ", time, level)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Output style of the binary's log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored
    Pretty,
    /// Plain text, the default under CI
    Compact,
    Json,
}

impl LogFormat {
    /// Reads `NGPACK_LOG_FORMAT`, falling back on `CI`.
    pub fn from_env() -> Self {
        let requested = std::env::var("NGPACK_LOG_FORMAT").unwrap_or_default();
        Self::parse(&requested, std::env::var_os("CI").is_some())
    }

    fn parse(value: &str, ci: bool) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber on stderr. `RUST_LOG` filters (default
/// `info`), [`LogFormat::from_env`] picks the format.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .init(),
        format => registry
            .with(
                fmt::layer()
                    .event_format(LevelTagFormatter {
                        ansi: format == LogFormat::Pretty,
                    })
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

/// Values of the `service` field
pub mod services {
    pub const CONTENT_CACHE: &str = "content_cache";
    pub const STYLES: &str = "styles";
}

/// Values of the `operation` field
pub mod operations {
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const PROCESS: &str = "process";
}

/// Values of the `status` field
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const MISS: &str = "miss";
    pub const ERROR: &str = "error";
}

/// Leveled sink for user-facing build diagnostics.
pub trait BuildLog: Send + Sync {
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Forwards diagnostics to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl BuildLog for TracingLog {
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
}

/// Keeps every message in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    messages: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(level, _)| *level == LogLevel::Warn)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl BuildLog for MemoryLog {
    fn debug(&self, message: &str) {
        self.messages
            .lock()
            .push((LogLevel::Debug, message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.messages
            .lock()
            .push((LogLevel::Warn, message.to_string()));
    }
}
