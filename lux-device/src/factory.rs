//! Construção de portas a partir da configuração

use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::ftdi::FtdiProvider;
use crate::mock::MockFtdiBus;
use crate::port::DeviceOutputPort;

/// Tipo de dispositivo FTDI real
pub const FTDI_TYPE: &str = "ftdi";
/// Tipo de dispositivo simulado (sem hardware)
pub const VIRTUAL_TYPE: &str = "virtual";

/// Cria portas de saída para instâncias
///
/// Chamado na thread do worker da instância, nunca no loop de controle.
pub trait PortFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig) -> DeviceResult<Box<dyn DeviceOutputPort>>;
}

/// Fábrica padrão: `ftdi` e `virtual`
#[derive(Debug, Clone, Default)]
pub struct DefaultPortFactory;

impl DefaultPortFactory {
    pub fn new() -> Self {
        Self
    }

    /// Tipos aceitos neste build
    pub fn supported_types(&self) -> Vec<&'static str> {
        if cfg!(feature = "libftdi") {
            vec![FTDI_TYPE, VIRTUAL_TYPE]
        } else {
            vec![VIRTUAL_TYPE]
        }
    }

    #[cfg(feature = "libftdi")]
    fn create_ftdi(&self) -> DeviceResult<Box<dyn DeviceOutputPort>> {
        let bus = crate::libftdi::LibFtdiBus::new()?;
        Ok(Box::new(FtdiProvider::new(bus)))
    }

    #[cfg(not(feature = "libftdi"))]
    fn create_ftdi(&self) -> DeviceResult<Box<dyn DeviceOutputPort>> {
        Err(DeviceError::Unsupported(
            "ftdi support not compiled in (enable the `libftdi` feature)".into(),
        ))
    }

    fn create_virtual(&self) -> Box<dyn DeviceOutputPort> {
        let bus = MockFtdiBus::with_devices(vec![MockFtdiBus::device(0x0403, 0x6014, "LUXVIRT0")]);
        Box::new(FtdiProvider::new(bus))
    }
}

impl PortFactory for DefaultPortFactory {
    fn create(&self, config: &DeviceConfig) -> DeviceResult<Box<dyn DeviceOutputPort>> {
        debug!(device_type = %config.device_type, "Creating device port");

        match config.device_type.to_ascii_lowercase().as_str() {
            FTDI_TYPE => self.create_ftdi(),
            VIRTUAL_TYPE => Ok(self.create_virtual()),
            other => Err(DeviceError::Unsupported(format!("unknown device type '{}'", other))),
        }
    }
}
