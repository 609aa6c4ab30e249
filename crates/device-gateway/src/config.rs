use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub service_name: String,
    /// Message field naming the device in unsolicited data.
    pub identity_key: String,
    /// Message field carrying the correlation id of a command and its reply.
    pub correlation_key: String,
    pub command: CommandConfig,
    pub data: DataConfig,
    pub delivery: DeliveryConfig,
    pub heartbeat_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_name: "device-gateway".to_string(),
            identity_key: "name".to_string(),
            correlation_key: "uuid".to_string(),
            command: CommandConfig::default(),
            data: DataConfig::default(),
            delivery: DeliveryConfig::default(),
            heartbeat_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Always go to the device instead of answering reads from the cache.
    pub immediate: bool,
    pub timeout_ms: u64,
    /// Also push readings produced by commands to the event store.
    pub forward_readings: bool,
    /// Run on each device when it is added.
    pub init: Option<DeviceCommand>,
    /// Run on each device before it is removed.
    pub remove: Option<DeviceCommand>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            immediate: true,
            timeout_ms: 5000,
            forward_readings: false,
            init: None,
            remove: None,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Apply base/scale/offset; when false readings are register integers.
    pub transform: bool,
    pub cache_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            transform: true,
            cache_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Attempts per event; 0 retries until it succeeds.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl GatewayConfig {
    /// Read `path` as YAML; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml(&contents)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(contents).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity_key.is_empty() || self.correlation_key.is_empty() {
            return Err(GatewayError::Config("message keys must not be empty".into()));
        }
        if self.identity_key == self.correlation_key {
            return Err(GatewayError::Config(
                "identity_key and correlation_key must differ".into(),
            ));
        }
        if self.data.cache_size == 0 {
            return Err(GatewayError::Config("data.cache_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.correlation_key, "uuid");
        assert!(config.command.immediate);
        assert_eq!(config.delivery.retries, 3);
        assert_eq!(config.data.cache_size, 1);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = GatewayConfig::from_yaml(
            "service_name: site-a\ncommand:\n  immediate: false\n  init: { command: Status }\ndelivery:\n  retries: 0\n",
        )
        .unwrap();
        assert_eq!(config.service_name, "site-a");
        assert!(!config.command.immediate);
        assert_eq!(config.command.timeout_ms, 5000);
        assert_eq!(
            config.command.init.map(|c| c.command).as_deref(),
            Some("Status")
        );
        assert_eq!(config.delivery.retries, 0);
        assert_eq!(config.heartbeat_secs, 300);
    }

    #[test]
    fn rejects_clashing_keys() {
        assert!(GatewayConfig::from_yaml("identity_key: id\ncorrelation_key: id\n").is_err());
        assert!(GatewayConfig::from_yaml("data: { cache_size: 0 }\n").is_err());
    }
}
