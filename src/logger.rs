//! Leveled logging sink consumed by the supervisor.
//!
//! The core only ever talks to the [`Logger`] trait. [`NilLogger`] (the
//! default) discards everything; [`TracingLogger`] forwards to the `tracing`
//! ecosystem with any attached fields rendered as a `key=value` suffix.

use std::collections::HashMap;
use std::sync::Arc;

/// Structured fields attached to a logger with [`Logger::with_fields`].
pub type LogFields = HashMap<String, String>;

/// Minimal leveled logging interface.
pub trait Logger: Send + Sync {
    /// Returns a logger that includes the given fields on every record.
    fn with_fields(&self, fields: LogFields) -> Arc<dyn Logger>;

    fn info(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Logger that discards all records. The default for unconfigured components.
#[derive(Debug, Clone, Copy, Default)]
pub struct NilLogger;

impl Logger for NilLogger {
    fn with_fields(&self, _fields: LogFields) -> Arc<dyn Logger> {
        Arc::new(NilLogger)
    }

    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// Logger backed by the `tracing` crate.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    fields: LogFields,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    // Fields are sorted so records are stable across runs.
    fn suffix(&self) -> String {
        if self.fields.is_empty() {
            return String::new();
        }

        let mut pairs: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        pairs.sort();
        format!(" [{}]", pairs.join(" "))
    }
}

impl Logger for TracingLogger {
    fn with_fields(&self, fields: LogFields) -> Arc<dyn Logger> {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        Arc::new(TracingLogger { fields: merged })
    }

    fn info(&self, msg: &str) {
        tracing::info!("{}{}", msg, self.suffix());
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{}{}", msg, self.suffix());
    }

    fn error(&self, msg: &str) {
        tracing::error!("{}{}", msg, self.suffix());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_logger_renders_sorted_fields() {
        let logger = TracingLogger::new();
        let decorated = logger.with_fields(LogFields::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]));
        // The decorated logger is usable; suffix formatting is checked on a
        // concrete instance since the trait object hides it.
        decorated.info("hello");

        let concrete = TracingLogger {
            fields: LogFields::from([
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ]),
        };
        assert_eq!(concrete.suffix(), " [a=1 b=2]");
    }
}
