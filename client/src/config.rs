// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub app: AppConfig,
    pub endpoint: EndpointConfig,
    pub checkin: CheckInConfig,
    pub agent: AgentConfig,
    pub observability: ObservabilityConfig,
}

/// Identity of the instrumented application, sent along with every payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
    pub hostname: String,
    pub push_api_key: String,
    /// Master switch; when false the client accepts no events at all
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the collection service
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInConfig {
    /// Debounce before the first flush after idleness
    pub initial_debounce_ms: u64,
    /// Debounce between consecutive flushes during a burst
    pub between_debounce_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Starting interval between aggregate delivery cycles; the server can
    /// steer this up or down at runtime
    pub cycle_interval_seconds: u64,
    /// Maximum number of undelivered aggregate payloads kept for retry
    pub backlog_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.app.name.is_empty() {
            return Err("App name cannot be empty".to_string());
        }
        if self.app.push_api_key.is_empty() {
            return Err("Push API key cannot be empty".to_string());
        }

        if self.endpoint.base_url.is_empty() {
            return Err("Endpoint base_url cannot be empty".to_string());
        }
        if self.endpoint.timeout_seconds == 0 {
            return Err("Endpoint timeout_seconds must be greater than 0".to_string());
        }

        if self.checkin.initial_debounce_ms == 0 {
            return Err("Check-in initial_debounce_ms must be greater than 0".to_string());
        }
        if self.checkin.between_debounce_seconds == 0 {
            return Err("Check-in between_debounce_seconds must be greater than 0".to_string());
        }

        if self.agent.cycle_interval_seconds == 0 {
            return Err("Agent cycle_interval_seconds must be greater than 0".to_string());
        }
        if self.agent.backlog_limit == 0 {
            return Err("Agent backlog_limit must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppConfig {
                name: "unknown-app".to_string(),
                environment: "development".to_string(),
                hostname: "localhost".to_string(),
                push_api_key: "change-me-in-production".to_string(),
                active: true,
            },
            endpoint: EndpointConfig {
                base_url: "https://collect.beacon.example".to_string(),
                timeout_seconds: 30,
            },
            checkin: CheckInConfig {
                initial_debounce_ms: 100,
                between_debounce_seconds: 10,
            },
            agent: AgentConfig {
                cycle_interval_seconds: 60,
                backlog_limit: 5,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
