use reqwest::Url;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Service URL is an absolute http(s) URL
/// - Request timeout is not 0
/// - Poll interval is not 0 and does not exceed the pool timeout
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = Url::parse(&config.service.url).map_err(|e| {
        ConfigError::ValidationError(format!(
            "service.url '{}' is not a valid URL: {}",
            config.service.url, e
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "service.url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.service.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "service.timeout_secs cannot be 0".to_string(),
        ));
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if orchestrator.pool_timeout_ms < orchestrator.poll_interval_ms {
        return Err(ConfigError::ValidationError(format!(
            "orchestrator.pool_timeout_ms ({}) must be at least poll_interval_ms ({})",
            orchestrator.pool_timeout_ms, orchestrator.poll_interval_ms
        )));
    }

    Ok(())
}
