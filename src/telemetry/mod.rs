//! Tracing setup and response logging
//!
//! ```rust,ignore
//! use regionflow::telemetry::{init_subscriber, OutputFormat, SubscriberConfig};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level_str("debug")?
//!     .output_format(OutputFormat::Json)
//!     .build();
//! init_subscriber(config)?;
//! ```

use async_trait::async_trait;

use crate::config::EnvironmentConfig;
use crate::error::{Result, SendError};
use crate::hooks::{Hook, HookResult};
use crate::processor::ProcessorContext;

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl std::str::FromStr for OutputFormat {
    type Err = SendError;

    fn from_str(format: &str) -> Result<Self> {
        match format.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-compact" => Ok(OutputFormat::JsonCompact),
            _ => Err(SendError::ConfigurationError(format!(
                "Invalid log format: {format}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            output_format: OutputFormat::Text,
        }
    }

    /// Take the level from `logLevel` of an environment config, if valid.
    pub fn from_environment_config(config: &EnvironmentConfig) -> Self {
        let builder = Self::builder();
        match config.log_level.as_deref() {
            Some(level) => match builder.log_level_str(level) {
                Ok(builder) => builder.build(),
                Err(err) => {
                    tracing::warn!(target: "regionflow::orchestrator", error = %err, "ignoring configured log level");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

/// Builder for [`SubscriberConfig`]
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self> {
        let level = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                return Err(SendError::ConfigurationError(format!(
                    "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
                )));
            }
        };
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
        }
    }
}

/// Install a global `fmt` subscriber for the `regionflow` targets.
///
/// An already installed subscriber is not an error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<()> {
    let level = config.log_level.as_str().to_lowercase();
    let filter = format!("regionflow={level}");

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .compact()
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("global default trace dispatcher has already been set") => Ok(()),
        Err(e) => Err(SendError::ConfigurationError(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Initialize from `REGIONFLOW_LOG_LEVEL` and `REGIONFLOW_LOG_FORMAT`.
pub fn init_from_env() -> Result<()> {
    let mut builder = SubscriberConfig::builder();
    if let Ok(level) = std::env::var("REGIONFLOW_LOG_LEVEL") {
        builder = builder.log_level_str(&level)?;
    }
    if let Ok(format) = std::env::var("REGIONFLOW_LOG_FORMAT") {
        builder = builder.output_format(format.parse()?);
    }
    init_subscriber(builder.build())
}

/// `response_logging` hook writing one line per final response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingResponseLogger;

impl TracingResponseLogger {
    pub const NAME: &'static str = "tracingResponseLogger";
}

#[async_trait]
impl Hook<ProcessorContext, ()> for TracingResponseLogger {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        if let Some(response) = &ctx.response {
            tracing::info!(
                target: "regionflow::response",
                region = %ctx.region.name,
                protocol = %response.protocol,
                name = response.name.as_deref().unwrap_or_default(),
                status = response.status_code,
                total_ms = response.timings.total,
                "response"
            );
        }
        Ok(HookResult::Value(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpFile, Protocol, Response};
    use std::sync::Arc;

    #[test]
    fn log_level_parsing() {
        let config = SubscriberConfig::builder().log_level_str("DEBUG").unwrap().build();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert!(SubscriberConfig::builder().log_level_str("loud").is_err());
        assert_eq!("json-compact".parse::<OutputFormat>().unwrap(), OutputFormat::JsonCompact);
    }

    #[test]
    fn environment_config_level_falls_back_to_info() {
        let config = EnvironmentConfig::builder().log_level("nonsense").build();
        assert_eq!(SubscriberConfig::from_environment_config(&config).log_level, tracing::Level::INFO);
        let config = EnvironmentConfig::builder().log_level("trace").build();
        assert_eq!(SubscriberConfig::from_environment_config(&config).log_level, tracing::Level::TRACE);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logs_final_response() {
        let mut ctx = ProcessorContext::new(
            Arc::new(HttpFile::new("a.http")),
            Arc::new(EnvironmentConfig::default()),
        );
        let mut response = Response::new(Protocol::Http);
        response.status_code = 204;
        response.name = Some("GET http://localhost".to_string());
        ctx.response = Some(response);

        TracingResponseLogger.call(&mut ctx).await.unwrap();
        assert!(logs_contain("status=204"));
    }
}
