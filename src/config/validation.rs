use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client_authentication.allowed_keys.is_empty() {
        return Err(validation_err("allowed_keys cannot be empty"));
    }
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_http_url("upstream.base_url", &upstream.base_url)?;
    if let Some(referer) = upstream.referer.as_deref() {
        validate_http_url("upstream.referer", referer)?;
    }
    for (field_name, path) in [
        ("upstream.token_path", upstream.token_path.as_str()),
        ("upstream.chat_path", upstream.chat_path.as_str()),
    ] {
        if !path.starts_with('/') {
            return Err(validation_err(format!("{field_name} must start with '/'")));
        }
    }
    if upstream.model_name.trim().is_empty() {
        return Err(validation_err("upstream.model_name cannot be empty"));
    }
    if upstream.selected_chat_model.trim().is_empty() {
        return Err(validation_err("upstream.selected_chat_model cannot be empty"));
    }
    if upstream.token_timeout_secs == 0 {
        return Err(validation_err(
            "upstream.token_timeout_secs must be greater than 0",
        ));
    }
    if upstream.user_agents.is_empty() {
        return Err(validation_err("upstream.user_agents cannot be empty"));
    }
    if upstream
        .user_agents
        .iter()
        .any(|agent| agent.trim().is_empty() || http::HeaderValue::from_str(agent).is_err())
    {
        return Err(validation_err(
            "upstream.user_agents contains an empty or non-header-safe entry",
        ));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
