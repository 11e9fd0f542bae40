//! # 🔌 lux-device — Portas de Saída de LEDs
//!
//! Camada de hardware do runtime `lux`. Define o contrato
//! [`DeviceOutputPort`] e o driver FTDI que emula SPI em modo MPSSE para
//! empurrar frames de cor para fitas de LED.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        DeviceOutputPort (trait)         │
//! │  init() open() write() close() discover │
//! └───────────────────┬─────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────┐
//! │           FtdiProvider<B>               │
//! │  handshake | frame header/trailer       │
//! │  Closed → Ready → Error → Closed        │
//! └───────────────────┬─────────────────────┘
//!                     ↓
//! ┌──────────────────┐   ┌──────────────────┐
//! │  LibFtdiBus      │   │  MockFtdiBus     │
//! │  (libftdi1, USB) │   │  (memória)       │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! ## Componentes
//!
//! - [`mpsse`]: codificadores puros dos bursts de configuração e de frame
//! - [`FtdiProvider`]: máquina de estados da porta sobre um [`FtdiBus`]
//! - [`MockFtdiBus`]: barramento simulado com injeção de falhas
//! - [`DefaultPortFactory`]: cria portas `ftdi` ou `virtual` a partir da configuração
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use lux_device::{DefaultPortFactory, DeviceConfig, PortFactory, PortState};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::with_type("virtual");
//! let mut port = DefaultPortFactory::new().create(&config)?;
//! port.init(&config)?;
//! port.open()?;
//! port.write(&[0xff, 0x00, 0x00])?;
//! assert_eq!(port.state(), PortState::Ready);
//! port.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `libftdi`: habilita [`LibFtdiBus`](crate::libftdi::LibFtdiBus) e o tipo `ftdi`
//!   real (requer a biblioteca do sistema)

pub mod config;
pub mod error;
pub mod factory;
pub mod ftdi;
pub mod mock;
pub mod mpsse;
pub mod port;

#[cfg(feature = "libftdi")]
pub mod libftdi;

pub use config::{AUTO_SETTING, DEFAULT_RATE_HZ, DeviceConfig};
pub use error::{DeviceError, DeviceResult, WriteStage};
pub use factory::{DefaultPortFactory, FTDI_TYPE, PortFactory, VIRTUAL_TYPE};
pub use ftdi::{FtdiBus, FtdiProvider, UsbDeviceInfo, open_strings};
pub use mock::{BusCall, BusOp, MockFtdiBus};
pub use port::{DeviceOutputPort, DiscoveredDevice, DiscoveryResult, PortState};

pub use rgb::RGB8;

#[cfg(test)]
mod tests;
