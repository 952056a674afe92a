//! Tracing subscriber setup for embedders and test binaries
//!
//! `RUST_LOG` wins when set. Otherwise the configured level applies to this
//! crate only, so a chatty routing or media stack stays at its own level.

use crate::errors::{Result, SccpError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

const CRATE_TARGET: &str = "rvoip_sccp_core";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// One JSON object per event instead of the human-readable format
    pub json: bool,
    /// Source file and line on every event
    pub file_info: bool,
    /// Log span enter/exit, useful when following a single call
    pub log_spans: bool,
    /// Other targets enabled alongside the core, e.g. `"rvoip_media_core=debug"`
    pub extra_directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            extra_directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level given as text, as it appears in a config file
    pub fn from_level_str(level: &str) -> Result<Self> {
        Ok(Self::new(parse_log_level(level)?))
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut filter = EnvFilter::new(format!("{}={}", CRATE_TARGET, self.level));
        for directive in &self.extra_directives {
            let parsed: Directive = directive
                .parse()
                .map_err(|e| SccpError::Config(format!("Invalid log directive {}: {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber. A second call fails with
/// [`SccpError::Config`] and leaves the first subscriber in place.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| SccpError::Config(format!("Tracing subscriber already installed: {}", e)))?;

    tracing::debug!(target: CRATE_TARGET, "sccp core logging at {}", config.level);
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim()).map_err(|_| SccpError::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(SccpError::Config(_))));
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::from_level_str("trace")
            .unwrap()
            .with_json()
            .with_directive("rvoip_media_core=warn");
        assert_eq!(config.level, Level::TRACE);
        assert!(config.json);
        assert!(!config.log_spans);
        assert_eq!(config.extra_directives, vec!["rvoip_media_core=warn".to_string()]);
    }

    #[test]
    #[serial]
    fn test_bad_directive_is_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig::default().with_directive("rvoip_media_core=loud");
        assert!(matches!(setup_logging(config), Err(SccpError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_second_setup_is_rejected() {
        let _ = setup_logging(LoggingConfig::default());
        assert!(setup_logging(LoggingConfig::default()).is_err());
    }
}
