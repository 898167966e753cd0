use std::collections::HashSet;
use std::path::Path;
use crate::errors::ScanError;
use super::types::AppConfig;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

pub const SERVICE_TOKEN_ENV: &str = "SCANWARD_SERVICE_TOKEN";

const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<AppConfig, ScanError> {
    if !path.exists() {
        return Err(ScanError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ScanError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

/// Parse and validate a YAML document. An empty document yields the defaults.
pub fn parse_config_str(content: &str) -> Result<AppConfig, ScanError> {
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    // JSON Schema validation
    validate_schema(&yaml)?;

    // Parse into typed config
    let config: AppConfig = serde_yaml::from_value(yaml)?;

    // Semantic conflict detection
    validate_conflicts(&config)?;

    Ok(config)
}

/// Config from `path` if given, otherwise the defaults; environment
/// overrides are applied in both cases.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig, ScanError> {
    let mut config = match path {
        Some(path) => parse_config(path).await?,
        None => AppConfig::default(),
    };
    if let Ok(token) = std::env::var(SERVICE_TOKEN_ENV) {
        if !token.is_empty() {
            config.auth.service_token = Some(token);
        }
    }
    validate_conflicts(&config)?;
    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), ScanError> {
    // Convert YAML value to JSON for schema validation
    let json_str = serde_json::to_string(yaml)
        .map_err(|e| ScanError::Config(format!("Config conversion error: {}", e)))?;
    let json_value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| ScanError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| ScanError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        // Advisory only: semantic checks below reject what actually matters
        for e in errors {
            warn!(validation_error = %e, path = %e.instance_path, "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
pub fn validate_conflicts(config: &AppConfig) -> Result<(), ScanError> {
    let executor = &config.executor;
    if executor.workers == 0 {
        return Err(ScanError::Config("executor.workers must be at least 1".into()));
    }
    if executor.max_attempts == 0 {
        return Err(ScanError::Config("executor.max_attempts must be at least 1".into()));
    }
    if executor.heartbeat_interval_secs == 0 {
        return Err(ScanError::Config("executor.heartbeat_interval_secs must be at least 1".into()));
    }
    for (name, value) in [
        ("poll_interval_ms", executor.poll_interval_ms),
        ("visibility_timeout_secs", executor.visibility_timeout_secs),
        ("reaper_interval_secs", executor.reaper_interval_secs),
    ] {
        if value == 0 {
            return Err(ScanError::Config(format!("executor.{} must be at least 1", name)));
        }
    }
    if executor.stall_timeout_secs <= executor.heartbeat_interval_secs {
        return Err(ScanError::Config(format!(
            "executor.stall_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
            executor.stall_timeout_secs, executor.heartbeat_interval_secs
        )));
    }
    if executor.visibility_timeout_secs <= executor.heartbeat_interval_secs {
        warn!(
            visibility = executor.visibility_timeout_secs,
            heartbeat = executor.heartbeat_interval_secs,
            "Job claims may expire between heartbeats"
        );
    }

    let mut seen = HashSet::new();
    for entry in &config.auth.tokens {
        if entry.token.is_empty() {
            return Err(ScanError::Config(format!("Empty token for owner '{}'", entry.owner_id)));
        }
        if !seen.insert(entry.token.as_str()) {
            return Err(ScanError::Config(format!(
                "Duplicate API token configured for owner '{}'",
                entry.owner_id
            )));
        }
    }
    if let Some(service) = &config.auth.service_token {
        if seen.contains(service.as_str()) {
            return Err(ScanError::Config("service_token must differ from every account token".into()));
        }
    }

    if config.auth.tokens.is_empty() {
        warn!("No API tokens configured; every scan route will answer 401");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiToken, LogFormat};
    use std::io::Write;

    fn token(token: &str, owner: &str) -> ApiToken {
        ApiToken { token: token.to_string(), owner_id: owner.to_string() }
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.executor.simulated_delay_ms, 5_000);
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = parse_config_str(
            "server:\n  port: 9000\nexecutor:\n  workers: 4\nlogging:\n  format: json\n"
        ).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.executor.heartbeat_interval_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_conflicts_duplicate_tokens() {
        let mut config = AppConfig::default();
        config.auth.tokens = vec![
            token("tok-aaaaaaaaaaaaaaaa", "owner-1"),
            token("tok-aaaaaaaaaaaaaaaa", "owner-2"),
        ];
        assert!(matches!(validate_conflicts(&config), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_validate_conflicts_service_token_reused() {
        let mut config = AppConfig::default();
        config.auth.tokens = vec![token("tok-aaaaaaaaaaaaaaaa", "owner-1")];
        config.auth.service_token = Some("tok-aaaaaaaaaaaaaaaa".to_string());
        assert!(validate_conflicts(&config).is_err());
    }

    #[test]
    fn test_validate_conflicts_zero_workers() {
        let mut config = AppConfig::default();
        config.executor.workers = 0;
        assert!(validate_conflicts(&config).is_err());
    }

    #[test]
    fn test_validate_conflicts_zero_intervals() {
        for field in ["poll_interval_ms", "visibility_timeout_secs", "reaper_interval_secs"] {
            let mut config = AppConfig::default();
            match field {
                "poll_interval_ms" => config.executor.poll_interval_ms = 0,
                "visibility_timeout_secs" => config.executor.visibility_timeout_secs = 0,
                _ => config.executor.reaper_interval_secs = 0,
            }
            match validate_conflicts(&config) {
                Err(ScanError::Config(msg)) => assert!(msg.contains(field), "{}", msg),
                other => panic!("{} = 0 accepted: {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_zero_reaper_interval_in_yaml_is_rejected() {
        let result = parse_config_str("executor:\n  reaper_interval_secs: 0\n");
        assert!(matches!(result, Err(ScanError::Config(_))));
    }

    #[test]
    fn test_validate_conflicts_stall_shorter_than_heartbeat() {
        let mut config = AppConfig::default();
        config.executor.heartbeat_interval_secs = 30;
        config.executor.stall_timeout_secs = 30;
        assert!(validate_conflicts(&config).is_err());
    }

    #[test]
    fn test_validate_conflicts_default_config() {
        assert!(validate_conflicts(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_yaml_type_is_rejected() {
        assert!(matches!(parse_config_str("server:\n  port: not-a-port\n"), Err(ScanError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_parse_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "database:\n  path: /tmp/scans.db\nauth:\n  tokens:\n    - token: owner-token-0123456789\n      owner_id: owner-1\n"
        ).unwrap();

        let config = parse_config(file.path()).await.unwrap();
        assert_eq!(config.database.path, "/tmp/scans.db");
        assert_eq!(config.auth.tokens.len(), 1);
        assert_eq!(config.auth.tokens[0].owner_id, "owner-1");
    }

    #[tokio::test]
    async fn test_parse_config_missing_file() {
        let result = parse_config(Path::new("/nonexistent/scanward.yaml")).await;
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
