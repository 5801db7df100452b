//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// The served endpoint
    #[serde(default)]
    pub server: ServerConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json, pretty or compact
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on. Defaults to port 80, or 443 with TLS.
    #[serde(default)]
    pub listen: Option<String>,

    /// Drain timeout after shutdown; 0s waits for every connection
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,

    /// Whether HTTP keep-alive is enabled before shutdown
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// TLS settings; plain HTTP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// What every request gets back
    #[serde(default)]
    pub response: ResponseConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            timeout: Duration::ZERO,
            keep_alive: true,
            tls: None,
            response: ResponseConfig::default(),
        }
    }
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert: PathBuf,

    /// PEM private key
    pub key: PathBuf,

    /// ALPN protocols, defaults to http/1.1
    #[serde(default)]
    pub alpn: Vec<String>,
}

/// Canned response served by the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseConfig {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response body
    #[serde(default = "default_body")]
    pub body: String,

    /// Artificial handler delay
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: default_body(),
            delay: Duration::ZERO,
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_status() -> u16 {
    200
}

fn default_body() -> String {
    "ok\n".to_string()
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
