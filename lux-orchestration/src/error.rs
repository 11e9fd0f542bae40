//! Erros de orquestração

use lux_core::{ErrorKind, InstanceId};
use lux_device::DeviceError;
use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Erros de orquestração
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestrationError {
    /// Id ausente do registro
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),

    /// Operação proibida na instância de sistema
    #[error("Instance {0} is reserved")]
    ReservedInstance(InstanceId),

    /// Documento de backup malformado
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// Instância não está em execução
    #[error("Instance {0} is not running")]
    NotRunning(InstanceId),

    /// Instância ainda ativa (Starting, Running ou Stopping)
    #[error("Instance {0} is still active")]
    StillActive(InstanceId),

    /// Falha do registro
    #[error("Registry error: {0}")]
    Registry(String),

    /// Erro de dispositivo
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Worker da instância encerrou sem responder
    #[error("Worker of instance {0} is gone")]
    WorkerLost(InstanceId),

    /// Lock poison
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl OrchestrationError {
    /// Classe do erro
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::UnknownInstance(_)
            | OrchestrationError::ReservedInstance(_)
            | OrchestrationError::InvalidBackup(_)
            | OrchestrationError::Registry(_) => ErrorKind::Validation,
            OrchestrationError::NotRunning(_)
            | OrchestrationError::StillActive(_)
            | OrchestrationError::LockPoisoned(_) => ErrorKind::StateConflict,
            OrchestrationError::Device(err) => err.kind(),
            OrchestrationError::WorkerLost(_) => ErrorKind::Hardware,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for OrchestrationError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        OrchestrationError::LockPoisoned(err.to_string())
    }
}
