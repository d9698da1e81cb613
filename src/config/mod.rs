use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yml;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable pointing to a config file outside the default locations
pub const CONFIG_ENV: &str = "DE2M_CONFIG";
const CONFIG_PATHS: [&str; 2] = ["config/de2m.yaml", "de2m.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to find a config file, tried {0}")]
    NotFound(String),
    #[error("Unable to read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn api_timeout_default() -> u64 { return 30 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default="api_timeout_default")]
    pub timeout_secs: u64,
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "caleffi-dataeasy".to_string() }
fn mqtt_topic_root_default() -> String { return "caleffi-dataeasy".to_string() }
fn mqtt_ha_discovery_prefix_default() -> String { return "homeassistant".to_string() }
fn mqtt_unique_id_prefix_default() -> String { return "caleffi_dataeasy".to_string() }
fn mqtt_keep_alive_default() -> u64 { return 5 }
fn mqtt_queue_capacity_default() -> usize { return 512 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_topic_root_default")]
    pub topic_root: String,
    #[serde(default="mqtt_ha_discovery_prefix_default")]
    pub ha_discovery_prefix: String,
    #[serde(default="mqtt_unique_id_prefix_default")]
    pub unique_id_prefix: String,
    /// CA certificate of the broker, enables TLS
    #[serde(default)]
    pub tls_ca_path: Option<String>,
    #[serde(default="mqtt_keep_alive_default")]
    pub keep_alive_secs: u64,
    /// Requests the MQTT client buffers, must hold the discovery of the largest device
    #[serde(default="mqtt_queue_capacity_default")]
    pub queue_capacity: usize,
}

fn refresh_interval_default() -> u64 { return 5 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    /// Serial numbers of the meters to publish
    #[serde(deserialize_with="devices_from_list_or_csv")]
    pub devices: Vec<String>,
    #[serde(default="refresh_interval_default")]
    pub refresh_interval_minutes: u64,
    pub api: ApiConfig,
    pub mqtt: MqttConfig,
}

/* devices may be given as a YAML list or as "1234,5678" */
fn devices_from_list_or_csv<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Devices {
        List(Vec<String>),
        Csv(String),
    }

    let devices = match Devices::deserialize(deserializer)? {
        Devices::List(list) => list,
        Devices::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    return Ok(devices
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect());
}

impl Config {
    /// Load the config from `$DE2M_CONFIG`, `config/de2m.yaml` or `de2m.yaml`
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Config::from_file(Path::new(&path));
        }

        let path = CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::NotFound(CONFIG_PATHS.join(", ")))?;
        return Config::from_file(&path);
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let config = Config::parse(&contents)?;
        info!("Config loaded from {}", path.display());
        return Ok(config);
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validate()?;
        return Ok(config);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no devices configured".to_string()));
        }
        if self.refresh_interval_minutes == 0 {
            return Err(ConfigError::Invalid("refresh_interval_minutes must be at least 1".to_string()));
        }
        if self.mqtt.queue_capacity == 0 {
            return Err(ConfigError::Invalid("mqtt.queue_capacity must be at least 1".to_string()));
        }
        return Ok(());
    }

    pub fn refresh_interval(&self) -> Duration {
        return Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
devices:
  - "12345678"
api:
  base_url: "http://192.168.1.20"
  username: admin
  password: secret
mqtt:
  host: broker.local
"#;

    #[test]
    fn test_defaults() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.devices, vec!["12345678".to_string()]);
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_root, "caleffi-dataeasy");
        assert_eq!(config.mqtt.client_name, "caleffi-dataeasy");
        assert_eq!(config.mqtt.ha_discovery_prefix, "homeassistant");
        assert_eq!(config.mqtt.unique_id_prefix, "caleffi_dataeasy");
        assert_eq!(config.mqtt.user, None);
        assert_eq!(config.mqtt.tls_ca_path, None);
    }

    #[test]
    fn test_devices_as_csv() {
        let yaml = MINIMAL.replace("devices:\n  - \"12345678\"", "devices: \"111, 222,,333\"");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.devices, vec!["111", "222", "333"]);
    }

    #[test]
    fn test_invalid_values() {
        let yaml = format!("{MINIMAL}refresh_interval_minutes: 0\n");
        assert!(matches!(Config::parse(&yaml), Err(ConfigError::Invalid(_))));

        let yaml = MINIMAL.replace("devices:\n  - \"12345678\"", "devices: []");
        assert!(matches!(Config::parse(&yaml), Err(ConfigError::Invalid(_))));

        assert!(matches!(Config::parse("devices: ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_huge_refresh_interval_saturates() {
        let yaml = format!("{MINIMAL}refresh_interval_minutes: {}\n", i64::MAX);
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        file.write_all(b"refresh_interval_minutes: 15\n").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.refresh_interval_minutes, 15);
        assert_eq!(config.mqtt.host, "broker.local");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("de2m.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
