//! Documento de backup (registro completo + configurações)
//!
//! ```json
//! {
//!   "version": 1,
//!   "instances": [
//!     { "id": 0, "name": "First LED instance", "enabled": true,
//!       "settings": { "device": { "type": "ftdi", "output": "auto" } } }
//!   ]
//! }
//! ```
//!
//! A importação valida o documento inteiro antes de devolver qualquer
//! registro; um defeito estrutural rejeita tudo.

use std::collections::BTreeSet;

use lux_core::{InstanceId, SYSTEM_INSTANCE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::registry::{InstanceRecord, InstanceRegistry};

/// Versão do formato gerado
pub const BACKUP_VERSION: u32 = 1;

const REQUIRED_KEYS: [&str; 4] = ["id", "name", "enabled", "settings"];

/// Backup do registro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub instances: Vec<InstanceRecord>,
}

fn invalid(message: impl Into<String>) -> OrchestrationError {
    OrchestrationError::InvalidBackup(message.into())
}

impl BackupDocument {
    /// Exporta o registro (somente leitura)
    pub fn from_registry(registry: &dyn InstanceRegistry) -> Self {
        Self {
            version: BACKUP_VERSION,
            instances: registry.records(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Lê e valida um documento recebido
    pub fn from_json(value: &Value) -> OrchestrationResult<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| invalid("document must be an object"))?;

        let version = match root.get("version") {
            None => BACKUP_VERSION,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| invalid("'version' must be a positive integer"))?,
        };
        if version > BACKUP_VERSION {
            return Err(invalid(format!(
                "unsupported version {} (newest known is {})",
                version, BACKUP_VERSION
            )));
        }

        let instances = root
            .get("instances")
            .ok_or_else(|| invalid("missing key 'instances'"))?
            .as_array()
            .ok_or_else(|| invalid("'instances' must be an array"))?;

        let mut records = Vec::with_capacity(instances.len());
        for (index, raw) in instances.iter().enumerate() {
            records.push(parse_instance(index, raw)?);
        }

        let document = Self {
            version: BACKUP_VERSION,
            instances: records,
        };
        document.validate()?;
        Ok(document)
    }

    /// Regras entre entradas
    pub fn validate(&self) -> OrchestrationResult<()> {
        let mut seen: BTreeSet<InstanceId> = BTreeSet::new();
        for record in &self.instances {
            if !seen.insert(record.id) {
                return Err(invalid(format!("duplicate instance id {}", record.id)));
            }
            if record.name.trim().is_empty() {
                return Err(invalid(format!("instance {} has an empty name", record.id)));
            }
        }

        let mut names: Vec<String> = self.instances.iter().map(|r| r.name.to_lowercase()).collect();
        names.sort();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("duplicate instance name"));
        }

        if !seen.contains(&SYSTEM_INSTANCE) {
            return Err(invalid(format!("system instance {} is missing", SYSTEM_INSTANCE)));
        }
        Ok(())
    }

    /// Ids presentes no documento
    pub fn ids(&self) -> BTreeSet<InstanceId> {
        self.instances.iter().map(|r| r.id).collect()
    }
}

fn parse_instance(index: usize, raw: &Value) -> OrchestrationResult<InstanceRecord> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid(format!("instances[{}] must be an object", index)))?;

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(invalid(format!("instances[{}]: missing key '{}'", index, key)));
        }
    }

    let mut record: InstanceRecord = serde_json::from_value(raw.clone())
        .map_err(|e| invalid(format!("instances[{}]: {}", index, e)))?;
    record.name = record.name.trim().to_string();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use lux_core::SettingsType;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": 1,
            "instances": [
                { "id": 0, "name": "Main", "enabled": true, "settings": { "device": { "type": "virtual" } } },
                { "id": 2, "name": "Desk", "enabled": false, "settings": {} }
            ]
        })
    }

    #[test]
    fn test_parse_valid_document() {
        let doc = BackupDocument::from_json(&sample()).unwrap();
        assert_eq!(doc.instances.len(), 2);
        assert_eq!(doc.instances[0].settings[&SettingsType::Device]["type"], "virtual");
        assert_eq!(doc.ids().into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_missing_required_key() {
        let mut value = sample();
        value["instances"][1].as_object_mut().unwrap().remove("name");

        let err = BackupDocument::from_json(&value).unwrap_err();
        assert_eq!(err, OrchestrationError::InvalidBackup("instances[1]: missing key 'name'".into()));
    }

    #[test]
    fn test_missing_instances() {
        let err = BackupDocument::from_json(&json!({ "version": 1 })).unwrap_err();
        assert!(err.to_string().contains("instances"));
        assert!(BackupDocument::from_json(&json!([])).is_err());
    }

    #[test]
    fn test_unknown_settings_type() {
        let mut value = sample();
        value["instances"][1]["settings"] = json!({ "hologram": {} });
        assert!(matches!(
            BackupDocument::from_json(&value),
            Err(OrchestrationError::InvalidBackup(_))
        ));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut value = sample();
        value["instances"][1]["id"] = json!(0);
        let err = BackupDocument::from_json(&value).unwrap_err();
        assert!(err.to_string().contains("duplicate instance id 0"));
    }

    #[test]
    fn test_system_instance_required() {
        let mut value = sample();
        value["instances"][0]["id"] = json!(5);
        assert!(BackupDocument::from_json(&value).is_err());
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut value = sample();
        value["version"] = json!(BACKUP_VERSION + 1);
        assert!(BackupDocument::from_json(&value).is_err());
    }

    #[test]
    fn test_export_then_parse() {
        let mut registry = MemoryRegistry::new();
        let id = registry.create("Desk").unwrap();
        registry
            .save_setting(id, SettingsType::Smoothing, json!({ "time_ms": 200 }))
            .unwrap();

        let exported = BackupDocument::from_registry(&registry);
        let parsed = BackupDocument::from_json(&exported.to_json()).unwrap();
        assert_eq!(parsed, exported);
    }
}
