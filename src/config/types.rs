use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "scanward.db".to_string() }
    }
}

/// Worker pool, retry and liveness settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: usize,
    /// How long the simulated engine takes per scan.
    pub simulated_delay_ms: u64,
    /// Fallback poll period when no wake-up arrives.
    pub poll_interval_ms: u64,
    /// How long a claimed job stays invisible to other workers.
    pub visibility_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// A running scan with no heartbeat for this long is failed.
    pub stall_timeout_secs: u64,
    pub max_attempts: u32,
    pub reaper_interval_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            simulated_delay_ms: 5_000,
            poll_interval_ms: 1_000,
            visibility_timeout_secs: 60,
            heartbeat_interval_secs: 5,
            stall_timeout_secs: 120,
            max_attempts: 3,
            reaper_interval_secs: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token of the internal status reporter.
    pub service_token: Option<String>,
    pub tokens: Vec<ApiToken>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiToken {
    pub token: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}
