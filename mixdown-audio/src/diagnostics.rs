//! Diagnostics sink injected into every master's context

use crate::error::EngineError;
use crate::options::DebuggerOptions;
use std::sync::Arc;

/// Destination for engine log, warning and error reports
///
/// `details` carries extra hint lines (what the caller can do about it).
pub trait DiagnosticsSink: Send + Sync {
    fn log(&self, message: &str, details: &[&str]);
    fn warn(&self, message: &str, details: &[&str]);
    fn error(&self, message: &str, details: &[&str]);
}

/// Sink that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn log(&self, message: &str, details: &[&str]) {
        tracing::info!(details = ?details, "{message}");
    }

    fn warn(&self, message: &str, details: &[&str]) {
        tracing::warn!(details = ?details, "{message}");
    }

    fn error(&self, message: &str, details: &[&str]) {
        tracing::error!(details = ?details, "{message}");
    }
}

/// Filtered handle to a sink
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    options: DebuggerOptions,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DebuggerOptions::default())
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    /// Diagnostics backed by [`TracingSink`]
    pub fn new(options: DebuggerOptions) -> Self {
        Self::with_sink(Arc::new(TracingSink), options)
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticsSink>, options: DebuggerOptions) -> Self {
        Self { sink, options }
    }

    pub fn options(&self) -> DebuggerOptions {
        self.options
    }

    pub fn log(&self, message: &str, details: &[&str]) {
        if self.options.show_info {
            self.sink.log(message, details);
        }
    }

    pub fn warn(&self, message: &str, details: &[&str]) {
        if self.options.show_warnings {
            self.sink.warn(message, details);
        }
    }

    /// Report an error and hand it back for returning to the caller
    ///
    /// # Panics
    /// Panics when `break_on_error` is enabled.
    pub fn report(&self, error: EngineError, details: &[&str]) -> EngineError {
        let message = error.to_string();
        if self.options.show_errors {
            self.sink.error(&message, details);
        }
        if self.options.break_on_error {
            panic!("{message}");
        }
        error
    }
}
