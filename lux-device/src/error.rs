//! Erros da camada de dispositivo

use lux_core::ErrorKind;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Etapa de escrita de um frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Burst de configuração de clock/GPIO durante o open
    Setup,
    /// Chip-select ativo + diretiva de escrita com comprimento
    Header,
    /// Bytes do frame
    Payload,
    /// Chip-select inativo
    Trailer,
}

impl std::fmt::Display for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WriteStage::Setup => "setup",
            WriteStage::Header => "header",
            WriteStage::Payload => "payload",
            WriteStage::Trailer => "trailer",
        };
        f.write_str(name)
    }
}

/// Erros de dispositivo
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Configuração inválida
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Falha reportada pelo driver do fabricante
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Escrita incompleta
    #[error("Short write during {stage}: {written}/{expected} bytes ({message})")]
    ShortWrite {
        stage: WriteStage,
        expected: usize,
        written: usize,
        message: String,
    },

    /// Nenhum dispositivo compatível
    #[error("No device available: {0}")]
    NoDevice(String),

    /// Operação inválida no estado atual da porta
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Tipo de dispositivo não suportado neste build
    #[error("Unsupported device: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Classe do erro
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::InvalidConfig(_) | DeviceError::Unsupported(_) => ErrorKind::Validation,
            DeviceError::InvalidState(_) => ErrorKind::StateConflict,
            DeviceError::Hardware(_) | DeviceError::ShortWrite { .. } => ErrorKind::Hardware,
            DeviceError::NoDevice(_) => ErrorKind::ResourceExhaustion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::Hardware("USB device unavailable".into());
        assert!(err.to_string().contains("USB device unavailable"));
    }

    #[test]
    fn test_short_write_display() {
        let err = DeviceError::ShortWrite {
            stage: WriteStage::Payload,
            expected: 9,
            written: 4,
            message: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Short write during payload: 4/9 bytes (timeout)");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DeviceError::NoDevice("x".into()).kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(DeviceError::InvalidConfig("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(DeviceError::InvalidState("x".into()).kind(), ErrorKind::StateConflict);
        assert_eq!(DeviceError::Hardware("x".into()).kind(), ErrorKind::Hardware);
    }
}
