use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::config::LoggingConfig;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    pub fn from_config_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "verbose" | "trace" => Some(Self::Verbose),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Verbose => "VERBOSE",
        }
    }

    fn as_colored_str(self) -> &'static str {
        match self {
            Self::Error => "\x1b[31mERROR\x1b[0m",
            Self::Warn => "\x1b[33mWARN\x1b[0m",
            Self::Info => "\x1b[32mINFO\x1b[0m",
            Self::Debug => "\x1b[36mDEBUG\x1b[0m",
            Self::Verbose => "\x1b[35mVERBOSE\x1b[0m",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            human_friendly: false,
        }
    }
}

impl LoggerConfig {
    pub fn from_logging_config(config: &LoggingConfig) -> Result<Self, InvalidLogLevel> {
        let min_level = LogLevel::from_config_value(&config.level).ok_or_else(|| InvalidLogLevel {
            provided: config.level.clone(),
        })?;

        Ok(Self {
            min_level,
            human_friendly: config.human_friendly,
        })
    }
}

#[derive(Debug)]
pub struct InvalidLogLevel {
    pub provided: String,
}

impl fmt::Display for InvalidLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
            self.provided
        )
    }
}

impl std::error::Error for InvalidLogLevel {}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

#[derive(Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }
}

pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn error(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Error, context, message, None);
    }

    pub fn warn(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Warn, context, message, None);
    }

    pub fn info(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Info, context, message, None);
    }

    pub fn debug(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Debug, context, message, None);
    }

    pub fn verbose(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Verbose, context, message, None);
    }

    pub fn log(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<Value>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let line = self.format_line(level, context, message, payload.as_ref());
        self.sink.write_line(&line);
    }

    // Lets hot paths skip building JSON payloads nobody will see.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }

    fn format_line(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<&Value>,
    ) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let rendered_level = if self.config.human_friendly {
            level.as_colored_str()
        } else {
            level.as_str()
        };

        let context_part = match context {
            Some(ctx) if !ctx.is_empty() => format!(" [{ctx}]"),
            _ => String::new(),
        };

        let payload_part = match payload {
            Some(value) => format!(" payload={value}"),
            None => String::new(),
        };

        format!("{timestamp} [{rendered_level}]{context_part} {message}{payload_part}")
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .field("sink", &"<dyn LogSink>")
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::LoggingConfig;

    use super::test_support::memory_logger;
    use super::{LogLevel, LoggerConfig};

    #[test]
    fn parses_config_levels_case_insensitively() {
        assert_eq!(LogLevel::from_config_value("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_config_value(" warn "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("loud"), None);
    }

    #[test]
    fn logger_config_rejects_unknown_level() {
        let err = LoggerConfig::from_logging_config(&LoggingConfig {
            level: "chatty".to_owned(),
            human_friendly: false,
        })
        .expect_err("unknown level should fail");
        assert!(err.to_string().contains("chatty"));
    }

    #[test]
    fn debug_threshold_excludes_verbose_logs() {
        let (logger, sink) = memory_logger(LogLevel::Debug);

        logger.debug(Some("tests::logger"), "debug message");
        logger.verbose(Some("tests::logger"), "verbose message");

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[DEBUG]"));
        assert!(!lines[0].contains("verbose message"));
    }

    #[test]
    fn log_supports_optional_json_payload() {
        let (logger, sink) = memory_logger(LogLevel::Info);

        logger.log(
            LogLevel::Info,
            Some("worker::s01"),
            "turn started",
            Some(json!({"endpoint":"s01","ordinal":0})),
        );

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[INFO]"));
        assert!(lines[0].contains("[worker::s01]"));
        assert!(lines[0].contains("payload={\"endpoint\":\"s01\",\"ordinal\":0}"));
        assert!(lines[0].starts_with("20"));
    }

    #[test]
    fn enabled_reflects_threshold() {
        let (logger, _sink) = memory_logger(LogLevel::Warn);
        assert!(logger.enabled(LogLevel::Error));
        assert!(logger.enabled(LogLevel::Warn));
        assert!(!logger.enabled(LogLevel::Info));
    }
}
