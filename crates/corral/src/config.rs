//! Construction-time configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Serial line settings handed to the controller implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub rtscts: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            rtscts: true,
        }
    }
}

/// Network / NV parameters forwarded to the controller at start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub pan_id: Option<u16>,
    pub channel_list: Vec<u8>,
    pub precfg_key: Option<[u8; 16]>,
    pub precfg_keys_enable: Option<bool>,
}

/// Shepherd construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShepherdConfig {
    /// Serial device path, e.g. `/dev/ttyACM0`
    pub port: String,
    pub serial: SerialSettings,
    pub net: NetConfig,
    /// Device store location
    pub db_path: PathBuf,
    /// Suppress the `Ready` event on start
    pub quiet_start: bool,
}

impl Default for ShepherdConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            serial: SerialSettings::default(),
            net: NetConfig::default(),
            db_path: PathBuf::from("data/devices.json"),
            quiet_start: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_defaults() {
        let s = SerialSettings::default();
        assert_eq!(s.baud_rate, 115_200);
        assert!(s.rtscts);
    }

    #[test]
    fn test_config_deserializes_with_partial_input() {
        let cfg: ShepherdConfig =
            serde_json::from_str(r#"{"port": "/dev/ttyACM0", "net": {"pan_id": 6754}}"#).unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.net.pan_id, Some(6754));
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.db_path, PathBuf::from("data/devices.json"));
    }
}
