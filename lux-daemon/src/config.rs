//! Configuração do daemon (TOML)
//!
//! ```toml
//! [daemon]
//! state_file = "/var/lib/lux/state.json"
//! event_history = 256
//!
//! [[instances]]
//! name = "Living room"
//! enabled = true
//!
//! [instances.device]
//! type = "ftdi"
//! output = "auto"
//! rate = 1000000
//! hardwareLedCount = 120
//! ```
//!
//! A primeira entrada de `[[instances]]` vira a instância de sistema (id 0).

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use lux_device::DeviceConfig;
use lux_orchestration::{BACKUP_VERSION, InstanceId};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn default_event_history() -> usize {
    256
}

/// Seção `[daemon]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Arquivo de estado (backup restaurado na partida e gravado na saída)
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Tamanho do histórico de eventos do orquestrador
    #[serde(default = "default_event_history")]
    pub event_history: usize,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            state_file: None,
            event_history: default_event_history(),
        }
    }
}

/// Entrada `[[instances]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Arquivo de configuração completo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instances.len() > usize::from(InstanceId::MAX) + 1 {
            bail!("too many instances ({})", self.instances.len());
        }
        for (index, instance) in self.instances.iter().enumerate() {
            if instance.name.trim().is_empty() {
                bail!("instances[{}]: name must not be empty", index);
            }
            instance
                .device
                .validate()
                .with_context(|| format!("instances[{}] ({})", index, instance.name))?;
        }
        Ok(())
    }

    /// Registro inicial no formato de backup; `None` sem `[[instances]]`
    pub fn to_backup(&self) -> Option<serde_json::Value> {
        if self.instances.is_empty() {
            return None;
        }

        let instances: Vec<serde_json::Value> = self
            .instances
            .iter()
            .enumerate()
            .map(|(id, instance)| {
                json!({
                    "id": id,
                    "name": instance.name.trim(),
                    "enabled": instance.enabled,
                    "settings": { "device": instance.device.to_json() },
                })
            })
            .collect();

        Some(json!({ "version": BACKUP_VERSION, "instances": instances }))
    }
}
