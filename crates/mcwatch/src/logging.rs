use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::LogLevel;

/// `Thu Nov  5 09:08:59 2020`
pub const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

const LOG_LINES: usize = 1000;

/// Log lines kept for the dashboard log window, newest last.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    /// Lines scrolled back from the newest
    scroll: usize,
}

pub type SharedLog = Arc<Mutex<LogBuffer>>;

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            scroll: 0,
        }
    }

    pub fn shared() -> SharedLog {
        Arc::new(Mutex::new(LogBuffer::new(LOG_LINES)))
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll = (self.scroll + lines).min(self.lines.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn reset_scroll(&mut self) {
        self.scroll = 0;
    }

    /// The `height` lines to show, oldest first.
    pub fn window(&self, height: usize) -> Vec<&str> {
        let end = self.lines.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        self.lines
            .range(start..end)
            .map(String::as_str)
            .collect()
    }
}

/// Feeds tracing events into the dashboard log window.
pub struct DashboardLayer {
    log: SharedLog,
}

impl DashboardLayer {
    pub fn new(log: SharedLog) -> Self {
        DashboardLayer { log }
    }
}

impl<S> Layer<S> for DashboardLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let now = chrono::Local::now().format(CTIME_FORMAT);
        let line = format!("{}  {}{}", now, visitor.message, visitor.fields);

        if let Ok(mut log) = self.log.lock() {
            log.push(line);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Where log output goes.
pub enum LogSink {
    Stderr,
    Dashboard(SharedLog),
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: LogLevel, sink: LogSink) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let (stderr, dashboard) = match sink {
        LogSink::Stderr => (
            Some(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(false),
            ),
            None,
        ),
        LogSink::Dashboard(log) => (None, Some(DashboardLayer::new(log))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(dashboard)
        .try_init()
        .context("failed installing log subscriber")
}
