//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load and validate configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// Empty input is a valid, all-defaults configuration.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(contents)?
    };

    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
server:
  listen: "127.0.0.1:8080"
  timeout: 5s
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.listen.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(config.server.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_input_uses_defaults() {
        let config = parse_config("  \n").unwrap();
        assert!(config.server.tls.is_none());
        assert!(config.server.keep_alive);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_config("not: valid: yaml: {{{}}}");
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let result = parse_config("server:\n  response:\n    status: 42\n");
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }
}
