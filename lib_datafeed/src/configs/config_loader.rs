//! # Feed Configuration Loader
//!
//! A feed document names every logical connection the process manages and
//! carries the logging section. It is written in JSON5 so operators can keep
//! comments next to broker URLs:
//!
//! ```json5
//! {
//!   logging: { level: "debug", dir: "./logs" },
//!   providers: {
//!     positions: {
//!       providerType: "stomp",
//!       websocketUrl: "ws://broker:61614/ws",
//!       listenerTopic: "/topic/positions",
//!       requestTopic: "/app/positions/snapshot", // triggers the snapshot push
//!       keyColumn: "positionId",
//!     },
//!   },
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::provider_config::ProviderConfig;
use crate::errors::{ProviderError, Result};

/// Logging section of the feed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory receiving the daily-rolling JSON log files.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Disable to log to the console only.
    #[serde(default = "default_true")]
    pub file_enabled: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_file_prefix() -> String {
    "datafeed".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_dir(),
            file_prefix: default_file_prefix(),
            file_enabled: true,
        }
    }
}

/// Named providers plus logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Logical connection ID -> provider configuration.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl FeedConfig {
    pub fn provider(&self, id: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))
    }
}

/// Parses a JSON5 feed document.
pub fn parse_feed_config(text: &str) -> Result<FeedConfig> {
    json5::from_str(text).map_err(|e| ProviderError::Config(e.to_string()))
}

/// Reads and parses the feed document at `path`.
pub fn load_feed_config(path: &Path) -> Result<FeedConfig> {
    let text = fs::read_to_string(path)?;
    let config = parse_feed_config(&text)?;
    tracing::info!(
        path = %path.display(),
        providers = config.providers.len(),
        "Loaded feed configuration"
    );
    Ok(config)
}
