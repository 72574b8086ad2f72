//! Tracing subscriber setup.
use serde::{Deserialize, Serialize};
use serde_variant::to_variant_name;
use tracing_subscriber::EnvFilter;

use crate::{config, Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogLevel {
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Format {
    #[serde(rename = "compact")]
    #[default]
    Compact,
    #[serde(rename = "pretty")]
    Pretty,
    #[serde(rename = "json")]
    Json,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(to_variant_name(self).map_err(|_| std::fmt::Error)?)
    }
}

const MODULE_WHITELIST: &[&str] = &["filestream", "tower_http", "opendal"];

/// The filter `init` installs.
///
/// 1. `RUST_LOG` when set
/// 2. `override_filter` from the configuration
/// 3. every module of `MODULE_WHITELIST` at the configured level
///
/// # Errors
///
/// When a filter directive cannot be parsed.
pub fn filter(config: &config::Logger) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.override_filter.clone().unwrap_or_else(|| {
        MODULE_WHITELIST
            .iter()
            .map(|m| format!("{m}={}", config.level))
            .collect::<Vec<_>>()
            .join(",")
    });
    EnvFilter::try_new(&directives)
        .map_err(|err| Error::Message(format!("invalid log filter `{directives}`: {err}")))
}

/// Installs the global tracing subscriber. Does nothing when logging is
/// disabled or a subscriber is already installed.
///
/// # Errors
///
/// When the configured filter is invalid.
pub fn init(config: &config::Logger) -> Result<()> {
    if !config.enable {
        return Ok(());
    }

    let builder = tracing_subscriber::FmtSubscriber::builder().with_env_filter(filter(config)?);

    let installed = match config.format {
        Format::Compact => builder.compact().try_init(),
        Format::Pretty => builder.pretty().try_init(),
        Format::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
