//! Configuração de dispositivo

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};
use crate::mpsse;

/// Seleção automática do primeiro dispositivo encontrado
pub const AUTO_SETTING: &str = "auto";

/// Taxa padrão do clock serial (Hz)
pub const DEFAULT_RATE_HZ: u32 = 1_000_000;

fn default_type() -> String {
    "ftdi".to_string()
}

fn default_output() -> String {
    AUTO_SETTING.to_string()
}

fn default_rate() -> u32 {
    DEFAULT_RATE_HZ
}

fn default_led_count() -> usize {
    1
}

/// Configuração de uma porta de saída
///
/// Espelha o objeto `device` das configurações persistidas de cada instância.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Família do dispositivo (`ftdi`, `virtual`)
    #[serde(rename = "type", default = "default_type")]
    pub device_type: String,
    /// String de seleção (`auto`, `s:0x0403:0x6014:SERIAL`, `i:0x0403:0x6014:0`)
    #[serde(default = "default_output")]
    pub output: String,
    /// Taxa de clock solicitada (Hz)
    #[serde(default = "default_rate")]
    pub rate: u32,
    /// Número de LEDs na fita
    #[serde(default = "default_led_count")]
    pub hardware_led_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: default_type(),
            output: default_output(),
            rate: default_rate(),
            hardware_led_count: default_led_count(),
        }
    }
}

impl DeviceConfig {
    /// Configuração com tipo específico
    pub fn with_type(device_type: &str) -> Self {
        Self {
            device_type: device_type.to_string(),
            ..Default::default()
        }
    }

    /// Lê do valor JSON persistido (campos ausentes usam o padrão)
    pub fn from_json(value: &serde_json::Value) -> DeviceResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| DeviceError::InvalidConfig(format!("device settings: {}", e)))
    }

    /// Converte para o valor JSON persistido
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// `output` pede descoberta automática?
    pub fn is_auto(&self) -> bool {
        self.output.eq_ignore_ascii_case(AUTO_SETTING)
    }

    /// Valida os campos
    pub fn validate(&self) -> DeviceResult<()> {
        if self.output.trim().is_empty() {
            return Err(DeviceError::InvalidConfig("output must not be empty".into()));
        }
        if self.hardware_led_count == 0 {
            return Err(DeviceError::InvalidConfig(
                "hardwareLedCount must be at least 1".into(),
            ));
        }
        mpsse::clock_divisor(mpsse::REFERENCE_CLOCK_HZ, self.rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.device_type, "ftdi");
        assert_eq!(config.output, "auto");
        assert_eq!(config.rate, 1_000_000);
        assert!(config.is_auto());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let value = serde_json::json!({ "output": "i:0x0403:0x6014:1", "hardwareLedCount": 60 });
        let config = DeviceConfig::from_json(&value).unwrap();
        assert_eq!(config.output, "i:0x0403:0x6014:1");
        assert_eq!(config.hardware_led_count, 60);
        assert_eq!(config.rate, DEFAULT_RATE_HZ);
        assert!(!config.is_auto());
    }

    #[test]
    fn test_auto_is_case_insensitive() {
        let config = DeviceConfig {
            output: "AUTO".into(),
            ..Default::default()
        };
        assert!(config.is_auto());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let config = DeviceConfig {
            rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DeviceError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let value = serde_json::json!({ "rate": "fast" });
        assert!(DeviceConfig::from_json(&value).is_err());
    }

    #[test]
    fn test_json_roundtrip_uses_type_key() {
        let value = DeviceConfig::with_type("virtual").to_json();
        assert_eq!(value["type"], "virtual");
    }
}
