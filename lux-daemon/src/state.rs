//! Arquivo de estado: o documento de backup persistido entre execuções

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

/// Lê o documento salvo; `None` se o arquivo ainda não existe
pub fn load(path: &Path) -> anyhow::Result<Option<serde_json::Value>> {
    if !path.exists() {
        debug!(path = %path.display(), "No state file yet");
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read state file {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("state file {} is not valid JSON", path.display()))?;
    info!(path = %path.display(), "State file loaded");
    Ok(Some(value))
}

/// Grava o documento (escrita em arquivo temporário + rename)
pub fn save(path: &Path, document: &serde_json::Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let text = serde_json::to_string_pretty(document)?;
    let partial = path.with_extension("json.partial");
    std::fs::write(&partial, text)
        .with_context(|| format!("cannot write {}", partial.display()))?;
    std::fs::rename(&partial, path)
        .with_context(|| format!("cannot replace state file {}", path.display()))?;

    info!(path = %path.display(), "State file saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_state_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("state.json")).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let document = json!({ "version": 1, "instances": [] });

        save(&path, &document).unwrap();
        assert_eq!(load(&path).unwrap(), Some(document));
        assert!(!path.with_extension("json.partial").exists());
    }

    #[test]
    fn test_corrupt_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load(&path).is_err());
    }
}
