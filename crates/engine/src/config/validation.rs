use toolrelay_common::config::{LlmConfig, RemoteConfig, ServerConfig};

use super::loader::{ConfigError, EngineConfig};

/// Validate the complete engine configuration.
///
/// Collects every problem before failing so one run reports them all.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_llm(&config.system.llm, &mut errors);
    validate_remote(&config.system.remote, &mut errors);
    validate_server(&config.system.server, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_llm(llm: &LlmConfig, errors: &mut Vec<String>) {
    if llm.model.trim().is_empty() {
        errors.push("llm.model must not be empty".into());
    }
    check_http_url("llm.host", &llm.host, errors);
    if let Some(temp) = llm.temperature {
        if !(0.0..=2.0).contains(&temp) {
            errors.push("llm.temperature must be between 0.0 and 2.0".into());
        }
    }
    if llm.request_timeout_secs == 0 {
        errors.push("llm.request_timeout_secs must be > 0".into());
    }
}

fn validate_remote(remote: &RemoteConfig, errors: &mut Vec<String>) {
    check_http_url("remote.url", &remote.url, errors);
    if remote.timeout_secs == 0 {
        errors.push("remote.timeout_secs must be > 0".into());
    }
    if remote.client_name.trim().is_empty() {
        errors.push("remote.client_name must not be empty".into());
    }
}

fn validate_server(server: &ServerConfig, errors: &mut Vec<String>) {
    if server.host.trim().is_empty() {
        errors.push("server.host must not be empty".into());
    }
    if server.port == 0 {
        errors.push("server.port must be > 0".into());
    }
}

fn check_http_url(key: &str, url: &str, errors: &mut Vec<String>) {
    if url.trim().is_empty() {
        errors.push(format!("{} must not be empty", key));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(format!("{} must start with http:// or https:// (got '{}')", key, url));
    }
}
