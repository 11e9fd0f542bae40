//! # 🎭 lux-orchestration — Orquestração de Instâncias
//!
//! Dono do ciclo de vida das instâncias de iluminação: valida pedidos de
//! forma síncrona, constrói instâncias de forma assíncrona, correlaciona
//! cada pedido de start com sua resposta e faz broadcast de operações para
//! todas as instâncias em execução.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  InstanceOrchestrator                       │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │  states: Stopped | Starting | Running | Stopping      │  │
//! │  │  arena:  InstanceId → Instance                        │  │
//! │  │  pending: InstanceId → [PendingStartRequest]          │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │        │ launch()                      ▲ InstanceEvent     │
//! │        ▼                               │                   │
//! │  ┌──────────────────┐   oneshot   ┌────┴───────────────┐   │
//! │  │ InstanceLauncher │────────────▶│ worker (thread)    │   │
//! │  └──────────────────┘             │ DeviceOutputPort   │   │
//! │                                   └────────────────────┘   │
//! │  EventBus ─▶ state-changed | list-changed | start-response │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Exemplo
//!
//! ```rust
//! use std::sync::Arc;
//! use lux_device::DefaultPortFactory;
//! use lux_orchestration::{InstanceOrchestrator, MemoryRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (mut orch, mut events) = InstanceOrchestrator::new(
//!     Box::new(MemoryRegistry::new()),
//!     Arc::new(DefaultPortFactory::new()),
//! );
//!
//! // Sem dispositivo `virtual` configurado a construção falha
//! assert!(orch.start_instance(0, Some(1), 7));
//! if let Some(event) = events.recv().await {
//!     orch.handle_instance_event(event);
//! }
//! assert!(!orch.is_instance_running(0));
//! assert!(orch.last_fault(0).is_some());
//! # }
//! ```
//!
//! ## Políticas
//!
//! - A instância 0 é reservada: não pode ser removida nem parada diretamente
//! - Starts explícitos ligam o flag `enabled`; stops explícitos desligam
//! - `restore_backup` nunca reinicia instâncias
//! - Falhas de construção não geram resposta ao chamador

pub mod backup;
pub mod error;
pub mod events;
pub mod instance;
pub mod launcher;
pub mod orchestrator;
pub mod power;
pub mod registry;

pub use backup::{BACKUP_VERSION, BackupDocument};
pub use error::{OrchestrationError, OrchestrationResult};
pub use events::{CallerId, EventBus, EventFilter, EventHandler, OrchestratorEvent, Subscription};
pub use instance::{Instance, InstanceCommand, InstanceEvent, average_color};
pub use launcher::{InstanceLauncher, LaunchHandle};
pub use orchestrator::{InstanceData, InstanceOrchestrator, OrchestratorConfig, PendingStartRequest};
pub use power::{PowerEvent, PowerEventBridge};
pub use registry::{InstanceEntry, InstanceRecord, InstanceRegistry, InstanceSettings, MemoryRegistry};

// Re-exporta o vocabulário do core
pub use lux_core::{Component, InstanceId, InstanceState, SYSTEM_INSTANCE, SettingsType};
