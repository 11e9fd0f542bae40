//! Taxonomia de erros compartilhada

use serde::{Deserialize, Serialize};

/// Classe de um erro, independente da crate que o produziu
///
/// Erros de validação e de conflito de estado são detectados de forma
/// síncrona e nunca chegam à camada de dispositivo. Erros de hardware e de
/// esgotamento de recursos nascem na camada de dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorKind {
    /// Id desconhecido/reservado, documento malformado, configuração inválida
    #[error("validation error")]
    Validation,
    /// Operação incompatível com o estado atual
    #[error("state conflict")]
    StateConflict,
    /// Falha de open/write/close no hardware
    #[error("hardware error")]
    Hardware,
    /// Nenhum dispositivo compatível encontrado
    #[error("resource exhausted")]
    ResourceExhaustion,
}

impl ErrorKind {
    /// Erros que o chamador pode corrigir sem tocar no hardware
    pub fn is_caller_error(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::StateConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(ErrorKind::Validation.is_caller_error());
        assert!(ErrorKind::StateConflict.is_caller_error());
        assert!(!ErrorKind::Hardware.is_caller_error());
        assert!(!ErrorKind::ResourceExhaustion.is_caller_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ErrorKind::Hardware.to_string(), "hardware error");
    }
}
