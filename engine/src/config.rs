// Configuration management with layered configuration (file, env)

use crate::chain::ChainPolicy;
use crate::coordinator::{CoordinatorSettings, OverflowPolicy};
use crate::poller::PollerSettings;
use crate::recurrence::MissedPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed tick of the trigger poller.
    pub poll_interval_seconds: u64,
    /// TTL of the per-job execution lease; a crashed holder's lease is
    /// reclaimable after this long.
    pub lease_ttl_seconds: u64,
    pub max_jobs_per_tick: usize,
    pub max_concurrent_executions: usize,
    pub overflow: OverflowPolicy,
    pub missed_policy: MissedPolicy,
    pub chain_policy: ChainPolicy,
    pub self_touch_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
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
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
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
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }
        if self.engine.poll_interval_seconds == 0 {
            return Err("Engine poll_interval_seconds must be greater than 0".to_string());
        }
        if self.engine.lease_ttl_seconds == 0 {
            return Err("Engine lease_ttl_seconds must be greater than 0".to_string());
        }
        if self.engine.max_concurrent_executions == 0 {
            return Err("Engine max_concurrent_executions must be greater than 0".to_string());
        }
        if self.engine.max_jobs_per_tick == 0 {
            return Err("Engine max_jobs_per_tick must be greater than 0".to_string());
        }
        if let OverflowPolicy::Queue { capacity } = self.engine.overflow {
            if capacity == 0 {
                return Err("Overflow queue capacity must be greater than 0".to_string());
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            engine: EngineConfig {
                poll_interval_seconds: 60,
                lease_ttl_seconds: 300,
                max_jobs_per_tick: 100,
                max_concurrent_executions: 8,
                overflow: OverflowPolicy::default(),
                missed_policy: MissedPolicy::default(),
                chain_policy: ChainPolicy::default(),
                self_touch_window_seconds: 120,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

impl EngineConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            lease_ttl_seconds: self.lease_ttl_seconds,
            max_concurrent_executions: self.max_concurrent_executions,
            overflow: self.overflow,
            chain_policy: self.chain_policy,
            missed_policy: self.missed_policy,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval_seconds: self.poll_interval_seconds,
            max_jobs_per_tick: self.max_jobs_per_tick,
            self_touch_window_seconds: self.self_touch_window_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_poll_interval() {
        let mut settings = Settings::default();
        settings.engine.poll_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_queue() {
        let mut settings = Settings::default();
        settings.engine.overflow = OverflowPolicy::Queue { capacity: 0 };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_round_trip_through_serde() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back.engine.poll_interval_seconds, 60);
    }
}
