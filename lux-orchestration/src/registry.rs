//! Registro persistido de instâncias
//!
//! O orquestrador só conhece o trait [`InstanceRegistry`]. O formato de
//! armazenamento é externo; [`MemoryRegistry`] é a implementação em memória
//! usada pelo daemon e pelos testes.

use std::collections::BTreeMap;

use lux_core::{InstanceId, SYSTEM_INSTANCE, SettingsType};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, OrchestrationResult};

/// Configurações de uma instância, por tipo
pub type InstanceSettings = BTreeMap<SettingsType, serde_json::Value>;

/// Nome padrão da instância de sistema
pub const SYSTEM_INSTANCE_NAME: &str = "First LED instance";

/// Entrada listada pelo registro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub id: InstanceId,
    pub name: String,
    /// Estava ativa no último desligamento
    pub enabled: bool,
}

/// Entrada completa (entrada + configurações), usada no backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub settings: InstanceSettings,
}

impl InstanceRecord {
    pub fn entry(&self) -> InstanceEntry {
        InstanceEntry {
            id: self.id,
            name: self.name.clone(),
            enabled: self.enabled,
        }
    }
}

/// Diretório persistido de instâncias
pub trait InstanceRegistry: Send {
    /// Entradas ordenadas por id
    fn list(&self) -> Vec<InstanceEntry>;

    fn get(&self, id: InstanceId) -> Option<InstanceEntry>;

    /// Cria entrada nova com o menor id livre
    fn create(&mut self, name: &str) -> OrchestrationResult<InstanceId>;

    fn remove(&mut self, id: InstanceId) -> OrchestrationResult<()>;

    fn rename(&mut self, id: InstanceId, name: &str) -> OrchestrationResult<()>;

    fn set_enabled(&mut self, id: InstanceId, enabled: bool) -> OrchestrationResult<()>;

    fn settings(&self, id: InstanceId) -> Option<InstanceSettings>;

    fn save_setting(
        &mut self,
        id: InstanceId,
        settings_type: SettingsType,
        value: serde_json::Value,
    ) -> OrchestrationResult<()>;

    /// Substitui todo o conteúdo de uma vez (restauração de backup)
    fn replace_all(&mut self, records: Vec<InstanceRecord>) -> OrchestrationResult<()>;

    fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Todas as entradas com configurações
    fn records(&self) -> Vec<InstanceRecord> {
        self.list()
            .into_iter()
            .map(|entry| InstanceRecord {
                settings: self.settings(entry.id).unwrap_or_default(),
                id: entry.id,
                name: entry.name,
                enabled: entry.enabled,
            })
            .collect()
    }
}

fn validate_name(name: &str) -> OrchestrationResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OrchestrationError::Registry("instance name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// Registro em memória
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    records: BTreeMap<InstanceId, InstanceRecord>,
    /// Configurações copiadas para cada instância criada
    defaults: InstanceSettings,
}

impl MemoryRegistry {
    /// Registro contendo apenas a instância de sistema
    pub fn new() -> Self {
        Self::with_defaults(InstanceSettings::new())
    }

    /// Registro cujas novas instâncias recebem `defaults`
    pub fn with_defaults(defaults: InstanceSettings) -> Self {
        let mut records = BTreeMap::new();
        records.insert(
            SYSTEM_INSTANCE,
            InstanceRecord {
                id: SYSTEM_INSTANCE,
                name: SYSTEM_INSTANCE_NAME.to_string(),
                enabled: true,
                settings: defaults.clone(),
            },
        );
        Self { records, defaults }
    }

    /// Número de entradas
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_mut(&mut self, id: InstanceId) -> OrchestrationResult<&mut InstanceRecord> {
        self.records
            .get_mut(&id)
            .ok_or(OrchestrationError::UnknownInstance(id))
    }

    fn name_taken(&self, name: &str, except: Option<InstanceId>) -> bool {
        self.records
            .values()
            .any(|r| Some(r.id) != except && r.name.eq_ignore_ascii_case(name))
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry for MemoryRegistry {
    fn list(&self) -> Vec<InstanceEntry> {
        self.records.values().map(InstanceRecord::entry).collect()
    }

    fn get(&self, id: InstanceId) -> Option<InstanceEntry> {
        self.records.get(&id).map(InstanceRecord::entry)
    }

    fn create(&mut self, name: &str) -> OrchestrationResult<InstanceId> {
        let name = validate_name(name)?;
        if self.name_taken(&name, None) {
            return Err(OrchestrationError::Registry(format!(
                "instance name '{}' already exists",
                name
            )));
        }

        let id = (SYSTEM_INSTANCE + 1..=InstanceId::MAX)
            .find(|id| !self.records.contains_key(id))
            .ok_or_else(|| OrchestrationError::Registry("no free instance id".into()))?;

        self.records.insert(
            id,
            InstanceRecord {
                id,
                name,
                enabled: false,
                settings: self.defaults.clone(),
            },
        );
        Ok(id)
    }

    fn remove(&mut self, id: InstanceId) -> OrchestrationResult<()> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(OrchestrationError::UnknownInstance(id))
    }

    fn rename(&mut self, id: InstanceId, name: &str) -> OrchestrationResult<()> {
        let name = validate_name(name)?;
        if self.name_taken(&name, Some(id)) {
            return Err(OrchestrationError::Registry(format!(
                "instance name '{}' already exists",
                name
            )));
        }
        self.record_mut(id)?.name = name;
        Ok(())
    }

    fn set_enabled(&mut self, id: InstanceId, enabled: bool) -> OrchestrationResult<()> {
        self.record_mut(id)?.enabled = enabled;
        Ok(())
    }

    fn settings(&self, id: InstanceId) -> Option<InstanceSettings> {
        self.records.get(&id).map(|r| r.settings.clone())
    }

    fn save_setting(
        &mut self,
        id: InstanceId,
        settings_type: SettingsType,
        value: serde_json::Value,
    ) -> OrchestrationResult<()> {
        self.record_mut(id)?.settings.insert(settings_type, value);
        Ok(())
    }

    fn replace_all(&mut self, records: Vec<InstanceRecord>) -> OrchestrationResult<()> {
        self.records = records.into_iter().map(|r| (r.id, r)).collect();
        Ok(())
    }
}
