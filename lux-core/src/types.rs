//! Tipos fundamentais do runtime

use serde::{Deserialize, Serialize};

/// Identificador de instância
pub type InstanceId = u8;

/// Instância de sistema (reservada)
///
/// Não pode ser criada, removida nem parada diretamente.
pub const SYSTEM_INSTANCE: InstanceId = 0;

/// Estado do ciclo de vida de uma instância
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Sem pipeline construído
    #[default]
    Stopped,
    /// Construção assíncrona em andamento
    Starting,
    /// Pipeline pronto e enviando frames
    Running,
    /// Parada solicitada, aguardando confirmação do worker
    Stopping,
}

impl InstanceState {
    /// Starting, Running ou Stopping
    pub fn is_active(self) -> bool {
        !matches!(self, InstanceState::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Componente de um pipeline que pode ser ligado/desligado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    /// Todos os componentes da instância
    All,
    Smoothing,
    BlackBorder,
    Forwarder,
    VideoGrabber,
    SystemGrabber,
    Color,
    Effect,
    /// Saída de hardware (DeviceOutputPort)
    LedDevice,
}

impl Component {
    /// Componentes individuais (sem `All`)
    pub const INDIVIDUAL: [Component; 8] = [
        Component::Smoothing,
        Component::BlackBorder,
        Component::Forwarder,
        Component::VideoGrabber,
        Component::SystemGrabber,
        Component::Color,
        Component::Effect,
        Component::LedDevice,
    ];

    /// Nome legível
    pub fn name(self) -> &'static str {
        match self {
            Component::All => "LUX",
            Component::Smoothing => "Smoothing",
            Component::BlackBorder => "Blackborder detector",
            Component::Forwarder => "Forwarder",
            Component::VideoGrabber => "Video capture device",
            Component::SystemGrabber => "System capture device",
            Component::Color => "Color calibration",
            Component::Effect => "Effect",
            Component::LedDevice => "LED device",
        }
    }
}

/// Tipo de configuração persistida por instância
///
/// Serializado em camelCase; é a chave usada no registro e no backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsType {
    Device,
    Leds,
    Color,
    Smoothing,
    BlackBorderDetector,
    InstanceCapture,
    Effects,
    BackgroundEffect,
    ForegroundEffect,
    NetworkForward,
    Calibration,
}

impl SettingsType {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingsType::Device => "device",
            SettingsType::Leds => "leds",
            SettingsType::Color => "color",
            SettingsType::Smoothing => "smoothing",
            SettingsType::BlackBorderDetector => "blackBorderDetector",
            SettingsType::InstanceCapture => "instanceCapture",
            SettingsType::Effects => "effects",
            SettingsType::BackgroundEffect => "backgroundEffect",
            SettingsType::ForegroundEffect => "foregroundEffect",
            SettingsType::NetworkForward => "networkForward",
            SettingsType::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for SettingsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_activity() {
        assert!(!InstanceState::Stopped.is_active());
        assert!(InstanceState::Starting.is_active());
        assert!(InstanceState::Running.is_active());
        assert!(InstanceState::Stopping.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(InstanceState::Running.to_string(), "running");
        assert_eq!(InstanceState::default(), InstanceState::Stopped);
    }

    #[test]
    fn test_settings_type_serde_matches_as_str() {
        for ty in [
            SettingsType::Device,
            SettingsType::BlackBorderDetector,
            SettingsType::InstanceCapture,
            SettingsType::Calibration,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn test_component_serde() {
        let json = serde_json::to_string(&Component::LedDevice).unwrap();
        assert_eq!(json, "\"LED_DEVICE\"");
        assert!(!Component::INDIVIDUAL.contains(&Component::All));
    }
}
