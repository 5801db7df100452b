//! Configuration validation.

use crate::config::Config;

/// Validate the configuration.
///
/// Checks for:
/// - A known log level
/// - A response status in the 100-599 range
/// - Non-empty TLS certificate and key paths
/// - Non-empty ALPN protocol names
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    let server = &config.server;

    if let Some(listen) = &server.listen {
        if listen.trim().is_empty() {
            errors.push("listen address cannot be empty".to_string());
        }
    }

    let status = server.response.status;
    if !(100..=599).contains(&status) {
        errors.push(format!("response status {status} is not a valid HTTP status"));
    }

    if let Some(tls) = &server.tls {
        if tls.cert.as_os_str().is_empty() {
            errors.push("tls.cert cannot be empty".to_string());
        }
        if tls.key.as_os_str().is_empty() {
            errors.push("tls.key cannot be empty".to_string());
        }
        if tls.alpn.iter().any(|p| p.is_empty()) {
            errors.push("tls.alpn entries cannot be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
