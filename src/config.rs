//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! tank-level.toml file. It provides one place to configure the tank
//! geometry, the sensor port, the broadcast target, the MQTT broker and the
//! retry behaviour of both supervised connections.
//!
//! Every section has defaults matching the stock device, and a partial file
//! only needs to name the values it changes:
//!
//! ```toml
//! [tank]
//! height_mm = 620
//!
//! [broker]
//! host = "10.0.0.5"
//! ```

use crate::supervisor::{Exhaustion, RetryPolicy};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "tank-level.toml";

/// Configuration values that cannot work.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Fail-safe would switch the radio off with no way to switch it back on
    #[error("network.radio_off_command requires network.reconnect_command")]
    RadioOffWithoutReconnect,
}

/// Application configuration loaded from tank-level.toml
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Tank geometry and sentence tag
    pub tank: TankConfig,
    /// Sensor port and smoothing
    pub sensor: SensorConfig,
    /// Host network link supervision
    pub network: NetworkConfig,
    /// UDP broadcast of NMEA sentences
    pub broadcast: BroadcastConfig,
    /// MQTT broker connection and topics
    pub broker: BrokerConfig,
    /// Main loop timing
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TankConfig {
    /// Height of a full tank in millimetres
    pub height_mm: u32,
    /// XDR transducer name ("FUEL", "WATER", ...)
    pub transducer: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial device the ultrasonic sensor is attached to (9600 8N1)
    pub device: String,
    /// Milliseconds between sensor reads
    pub sampling_interval_ms: u64,
    /// Number of readings in the moving average
    pub filter_window: usize,
    /// Consecutive missing readings before the sensor is reported down
    pub no_sensor_threshold: u32,
    /// A frame older than this counts as no sensor
    pub stale_after_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    /// Radio-off hold time before a fail-safe restart
    pub fail_safe_quiet_ms: u64,
    /// Address used to find the outbound interface (no packets are sent)
    pub probe_address: String,
    /// Command run to bring the network back, e.g. `["nmcli", "radio", "wifi", "on"]`
    pub reconnect_command: Option<Vec<String>>,
    /// Command run to switch the radio off on fail-safe
    pub radio_off_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Fixed destination; derived from the local address when unset
    pub address: Option<Ipv4Addr>,
    pub port: u16,
    /// Copies of each sentence sent per update
    pub repeat: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    /// Cooldown after exhausted retries, in multiples of the retry interval
    pub cooldown_multiplier: u32,
    /// Ticks between aggregate status publications
    pub status_every_ticks: u32,
    pub topics: TopicConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicConfig {
    pub status: String,
    pub height: String,
    pub percent: String,
    pub sentence: String,
    pub link_status: String,
    pub sensor_status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Main loop period in milliseconds
    pub tick_ms: u64,
    /// Ticks between forced console redraws
    pub display_refresh_ticks: u32,
}

impl Default for TankConfig {
    fn default() -> Self {
        TankConfig {
            height_mm: 400,
            transducer: "FUEL".to_string(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            device: "/dev/ttyUSB0".to_string(),
            sampling_interval_ms: 5000,
            filter_window: 10,
            no_sensor_threshold: 3,
            stale_after_ms: 3000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            retry_interval_ms: 10_000,
            max_retries: 5,
            fail_safe_quiet_ms: 180_000, // 3 minutes radio off
            probe_address: "8.8.8.8:53".to_string(),
            reconnect_command: None,
            radio_off_command: None,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            address: None,
            port: 8888,
            repeat: 1,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            host: "192.168.1.100".to_string(),
            port: 1883,
            client_id: "NMEA_Level_Sensor".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            retry_interval_ms: 5000,
            max_retries: 5,
            cooldown_multiplier: 10,
            status_every_ticks: 100, // ~5 s at 50 ms ticks
            topics: TopicConfig::default(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        TopicConfig {
            status: "sensors/level/status".to_string(),
            height: "sensors/level/height_mm".to_string(),
            percent: "sensors/level/percent".to_string(),
            sentence: "sensors/level/nmea_xdr".to_string(),
            link_status: "sensors/level/wifi_status".to_string(),
            sensor_status: "sensors/level/sensor_status".to_string(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            tick_ms: 50,
            display_refresh_ticks: 20,
        }
    }
}

impl NetworkConfig {
    /// Retry policy for the network link: fail-safe restart on exhaustion.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            exhaustion: Exhaustion::FailSafe {
                quiet_period: Duration::from_millis(self.fail_safe_quiet_ms),
            },
        }
    }
}

impl BrokerConfig {
    /// Retry policy for the broker session: cooldown on exhaustion.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            exhaustion: Exhaustion::Cooldown {
                multiplier: self.cooldown_multiplier,
            },
        }
    }

    /// Credentials, only when both username and password are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from tank-level.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(
                        "Loaded configuration from {} (tank {} mm, broker {}:{})",
                        path.display(),
                        config.tank.height_mm,
                        config.broker.host,
                        config.broker.port
                    );
                    config
                }
                Err(e) => {
                    warn!("Invalid config file format in {}: {}", path.display(), e);
                    warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!(
                    "No config file at {}, using default configuration",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str); 9] = [
            (self.tank.height_mm == 0, "tank.height_mm"),
            (self.sensor.filter_window == 0, "sensor.filter_window"),
            (self.driver.tick_ms == 0, "driver.tick_ms"),
            (self.network.retry_interval_ms == 0, "network.retry_interval_ms"),
            (self.network.max_retries == 0, "network.max_retries"),
            (self.broker.retry_interval_ms == 0, "broker.retry_interval_ms"),
            (self.broker.max_retries == 0, "broker.max_retries"),
            (self.broker.status_every_ticks == 0, "broker.status_every_ticks"),
            (self.broadcast.repeat == 0, "broadcast.repeat"),
        ];
        if let Some((_, field)) = checks.iter().find(|(zero, _)| *zero) {
            return Err(ConfigError::Zero(field));
        }
        // After a fail-safe restart only the reconnect command turns the radio on
        if self.network.radio_off_command.is_some() && self.network.reconnect_command.is_none() {
            return Err(ConfigError::RadioOffWithoutReconnect);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tank.height_mm, 400);
        assert_eq!(config.tank.transducer, "FUEL");
        assert_eq!(config.sensor.filter_window, 10);
        assert_eq!(config.sensor.sampling_interval_ms, 5000);
        assert_eq!(config.broadcast.port, 8888);
        assert_eq!(config.broadcast.repeat, 1);
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.client_id, "NMEA_Level_Sensor");
        assert_eq!(config.broker.topics.sentence, "sensors/level/nmea_xdr");
        assert_eq!(config.driver.tick_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.broker.host, parsed.broker.host);
        assert_eq!(config.broker.topics, parsed.broker.topics);
        assert_eq!(config.sensor.device, parsed.sensor.device);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [tank]
            height_mm = 620

            [broadcast]
            address = "192.168.4.255"

            [broker]
            username = "boat"
            password = "secret"

            [broker.topics]
            status = "boat/tank/status"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.tank.height_mm, 620);
        assert_eq!(parsed.tank.transducer, "FUEL");
        assert_eq!(parsed.broadcast.address, Some(Ipv4Addr::new(192, 168, 4, 255)));
        assert_eq!(parsed.broadcast.port, 8888);
        assert_eq!(parsed.broker.credentials(), Some(("boat", "secret")));
        assert_eq!(parsed.broker.topics.status, "boat/tank/status");
        assert_eq!(parsed.broker.topics.height, "sensors/level/height_mm");
    }

    #[test]
    fn test_empty_credentials_are_ignored() {
        let broker = BrokerConfig {
            username: Some(String::new()),
            password: Some("x".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(broker.credentials(), None);
        assert_eq!(BrokerConfig::default().credentials(), None);
    }

    #[test]
    fn test_retry_policies() {
        let config = Config::default();
        let broker = config.broker.retry_policy();
        assert_eq!(broker.retry_interval, Duration::from_secs(5));
        assert_eq!(broker.cooldown(), Some(Duration::from_secs(50)));

        let network = config.network.retry_policy();
        assert_eq!(
            network.exhaustion,
            Exhaustion::FailSafe {
                quiet_period: Duration::from_secs(180)
            }
        );
        assert_eq!(network.cooldown(), None);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.tank.height_mm = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("tank.height_mm")));

        let mut config = Config::default();
        config.broadcast.repeat = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("broadcast.repeat")));
    }

    #[test]
    fn test_validate_requires_reconnect_with_radio_off() {
        let mut config = Config::default();
        config.network.radio_off_command = Some(vec![
            "nmcli".to_string(),
            "radio".to_string(),
            "wifi".to_string(),
            "off".to_string(),
        ]);
        assert_eq!(config.validate(), Err(ConfigError::RadioOffWithoutReconnect));

        config.network.reconnect_command = Some(vec![
            "nmcli".to_string(),
            "radio".to_string(),
            "wifi".to_string(),
            "on".to_string(),
        ]);
        assert_eq!(config.validate(), Ok(()));

        // Reconnect alone is fine: nothing ever turns the radio off
        config.network.radio_off_command = None;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.broker.host, "192.168.1.100");
    }

    #[test]
    fn test_save_and_load_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.tank.height_mm = 812;
        config.broker.client_id = "galley-tank".to_string();
        config.save_to_path(temp_file.path()).unwrap();

        let loaded = Config::load_from_path(temp_file.path());
        assert_eq!(loaded.tank.height_mm, 812);
        assert_eq!(loaded.broker.client_id, "galley-tank");
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "tank = [not valid toml").unwrap();
        let config = Config::load_from_path(temp_file.path());
        assert_eq!(config.tank.height_mm, 400);
    }
}
