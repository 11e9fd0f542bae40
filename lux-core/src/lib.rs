//! # 💡 lux-core — Vocabulário Compartilhado
//!
//! Tipos usados por todas as crates do runtime `lux`: identificadores de
//! instância, estados do ciclo de vida, componentes do pipeline, tipos de
//! configuração persistida e a taxonomia de erros.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  lux-daemon                   │
//! │        (CLI, config, loop de controle)        │
//! └──────────────────────┬────────────────────────┘
//!                        ↓
//! ┌───────────────────────────────────────────────┐
//! │               lux-orchestration               │
//! │  InstanceOrchestrator | Registry | EventBus   │
//! └──────────────────────┬────────────────────────┘
//!                        ↓
//! ┌───────────────────────────────────────────────┐
//! │                  lux-device                   │
//! │   DeviceOutputPort | FtdiProvider | MPSSE     │
//! └──────────────────────┬────────────────────────┘
//!                        ↓
//!                   lux-core (este)
//! ```

pub mod error;
pub mod types;

pub use error::ErrorKind;
pub use types::{Component, InstanceId, InstanceState, SettingsType, SYSTEM_INSTANCE};
