//! Tracing setup and the logger sink bridge.
//!
//! [`init_tracing`] installs the global subscriber: `fmt` to stderr, an
//! optional daily-rolling file, and a [`SinkLayer`] that forwards every
//! event as a `(level, message)` pair to the logger registered with
//! [`crate::App`].

use crate::bridge::{self, LoggerFn};
use crate::config::LogConfig;
use crate::error::{Result, UpdateError};
use std::cell::Cell;
use std::fmt::Write as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the rolling file writer flushing. Hold it for the life of the process.
pub type LogGuard = tracing_appender::non_blocking::WorkerGuard;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. Returns the file writer guard when a
/// log directory is configured.
///
/// # Errors
///
/// Returns [`UpdateError::AlreadyInitialized`] if a global subscriber is
/// already set, or an I/O error if the log directory cannot be created.
pub fn init_tracing(config: &LogConfig) -> Result<Option<LogGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(SinkLayer::app())
        .try_init()
        .map_err(|e| UpdateError::AlreadyInitialized(format!("tracing subscriber: {e}")))?;
    Ok(guard)
}

/// Lowercase level name used on the logger sink.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

enum Target {
    App,
    Direct(LoggerFn),
}

/// Layer forwarding events to a `(level, message)` sink.
pub struct SinkLayer {
    target: Target,
}

impl std::fmt::Debug for SinkLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target {
            Target::App => "app",
            Target::Direct(_) => "direct",
        };
        f.debug_struct("SinkLayer").field("target", &target).finish()
    }
}

impl SinkLayer {
    /// Forward to whichever logger [`crate::App::run`] registered. Events
    /// before registration, or with no logger set, are not forwarded.
    pub fn app() -> Self {
        Self {
            target: Target::App,
        }
    }

    /// Forward to `sink` directly.
    pub fn direct(sink: LoggerFn) -> Self {
        Self {
            target: Target::Direct(sink),
        }
    }
}

thread_local! {
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // A sink that logs through tracing would otherwise recurse.
        if IN_SINK.with(Cell::get) {
            return;
        }
        let handle = match &self.target {
            Target::App => match crate::app::logger_handle() {
                Some(h) => Some(h),
                None => return,
            },
            Target::Direct(_) => None,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let level = level_name(event.metadata().level());
        let message = visitor.finish();

        IN_SINK.with(|f| f.set(true));
        match (&self.target, handle) {
            (Target::Direct(sink), _) => sink(level, &message),
            (Target::App, Some(h)) => bridge::invoke_logger(h, level, &message),
            (Target::App, None) => {}
        }
        IN_SINK.with(|f| f.set(false));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        if !self.fields.is_empty() {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            self.message.push_str(self.fields.trim_start());
        }
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
