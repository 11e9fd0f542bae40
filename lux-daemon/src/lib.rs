//! # 💡 lux-daemon — Processo de Controle
//!
//! Configuração TOML, arquivo de estado e o loop de controle que é dono do
//! [`InstanceOrchestrator`](lux_orchestration::InstanceOrchestrator).
//!
//! ```text
//! ┌──────────────┐  ControlCommand   ┌──────────────────────────────┐
//! │ ControlHandle│──────────────────▶│ ControlLoop (select!)        │
//! └──────────────┘                   │  ├─ InstanceEvent            │
//! ┌──────────────┐   PowerEvent      │  ├─ PowerEvent               │
//! │ SIGUSR1/2    │──────────────────▶│  └─ shutdown → state file    │
//! └──────────────┘                   └──────────────────────────────┘
//! ```

pub mod config;
pub mod control;
pub mod state;

pub use config::{DaemonConfig, DaemonSection, InstanceConfig};
pub use control::{ControlCommand, ControlHandle, ControlLoop};
