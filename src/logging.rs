use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Destination for the user-facing lines and status text a run produces.
///
/// The engine only talks to this trait; it never reaches for a global logger
/// when reporting progress.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    /// Latest one-line status, e.g. `Processing chunk 3 of ~12...`.
    fn status(&self, message: &str) {
        let _ = message;
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message)
    }

    fn status(&self, message: &str) {
        (**self).status(message)
    }
}

fn emit_tracing(level: Level, message: &str) {
    match level {
        Level::ERROR => tracing::error!("{}", message),
        Level::WARN => tracing::warn!("{}", message),
        Level::INFO => tracing::info!("{}", message),
        Level::DEBUG => tracing::debug!("{}", message),
        _ => tracing::trace!("{}", message),
    }
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        emit_tracing(level, message);
    }

    fn status(&self, message: &str) {
        tracing::debug!("status: {}", message);
    }
}

/// In-memory session log that can be read back and saved as plain text.
#[derive(Debug, Default)]
pub struct SessionLog {
    lines: Mutex<Vec<String>>,
    status: Mutex<String>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.lines.lock().join("\n")
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn current_status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for SessionLog {
    fn log(&self, level: Level, message: &str) {
        emit_tracing(level, message);
        let line = format!(
            "{} - {} - {}",
            chrono::Local::now().format("%H:%M:%S"),
            level,
            message
        );
        self.lines.lock().push(line);
    }

    fn status(&self, message: &str) {
        *self.status.lock() = message.to_string();
    }
}
