//! Driver FTDI em modo MPSSE
//!
//! `FtdiProvider` implementa [`DeviceOutputPort`] sobre qualquer
//! [`FtdiBus`]: o barramento real (feature `libftdi`) ou o
//! [`MockFtdiBus`](crate::mock::MockFtdiBus) em memória.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{AUTO_SETTING, DeviceConfig};
use crate::error::{DeviceError, DeviceResult, WriteStage};
use crate::mpsse;
use crate::port::{DeviceOutputPort, DiscoveredDevice, DiscoveryResult, PortState};

/// Qualquer vendor USB
pub const ANY_VENDOR: u16 = 0x0;
/// Qualquer produto USB
pub const ANY_PRODUCT: u16 = 0x0;

/// Atraso antes do reset no close, para o último frame (preto) sair por completo
pub const CLOSE_FLUSH_DELAY: Duration = Duration::from_millis(30);

/// Dispositivo visto na enumeração USB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    /// Vazio quando o dispositivo não reporta número de série
    pub serial: String,
    /// Posição na ordem de enumeração
    pub index: usize,
}

impl UsbDeviceInfo {
    /// `0x0403:0x6014`
    pub fn vendor_and_product(&self) -> String {
        format!("0x{:04x}:0x{:04x}", self.vendor_id, self.product_id)
    }
}

/// Acesso de baixo nível ao bridge USB
///
/// Cada método corresponde a uma chamada do driver do fabricante. Erros
/// carregam o texto do fabricante. `write_data` devolve quantos bytes foram
/// aceitos; um valor menor que o pedido é uma escrita incompleta.
pub trait FtdiBus: Send {
    fn find_all(&mut self, vendor: u16, product: u16) -> Result<Vec<UsbDeviceInfo>, String>;
    fn open_device(&mut self, device: &UsbDeviceInfo) -> Result<(), String>;
    fn open_string(&mut self, description: &str) -> Result<(), String>;
    fn disable_bitbang(&mut self) -> Result<(), String>;
    fn set_flow_control(&mut self, flow: u16) -> Result<(), String>;
    fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<(), String>;
    fn write_data(&mut self, data: &[u8]) -> Result<usize, String>;
    fn usb_close(&mut self) -> Result<(), String>;
    /// Última mensagem de erro do driver
    fn error_string(&self) -> String;
}

/// Strings de abertura estáveis para uma enumeração
///
/// `s:<vendor>:<product>:<serial>` quando há número de série, senão
/// `i:<vendor>:<product>:<index>` com índice contado por par vendor/produto.
pub fn open_strings(devices: &[UsbDeviceInfo]) -> Vec<DiscoveredDevice> {
    let mut indexes: BTreeMap<(u16, u16), usize> = BTreeMap::new();

    devices
        .iter()
        .map(|device| {
            let vendor_and_product = device.vendor_and_product();
            let value = if !device.serial.is_empty() {
                format!("s:{}:{}", vendor_and_product, device.serial)
            } else {
                let counter = indexes
                    .entry((device.vendor_id, device.product_id))
                    .or_insert(0);
                let value = format!("i:{}:{}", vendor_and_product, counter);
                *counter += 1;
                value
            };

            DiscoveredDevice {
                name: format!("{} ({})", value, device.manufacturer),
                value,
            }
        })
        .collect()
}

/// Texto do fabricante contido no erro
fn vendor_message(err: &DeviceError) -> String {
    match err {
        DeviceError::Hardware(msg) | DeviceError::NoDevice(msg) => msg.clone(),
        DeviceError::ShortWrite { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Porta FTDI em modo MPSSE
pub struct FtdiProvider<B: FtdiBus> {
    bus: B,
    device_type: String,
    output: String,
    rate_hz: u32,
    divisor: u16,
    state: PortState,
    usb_open: bool,
    last_error: Option<String>,
    close_delay: Duration,
}

impl<B: FtdiBus> std::fmt::Debug for FtdiProvider<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtdiProvider")
            .field("output", &self.output)
            .field("rate_hz", &self.rate_hz)
            .field("state", &self.state)
            .finish()
    }
}

impl<B: FtdiBus> FtdiProvider<B> {
    /// Cria porta fechada com a configuração padrão
    pub fn new(bus: B) -> Self {
        let config = DeviceConfig::default();
        Self {
            bus,
            device_type: config.device_type,
            output: config.output,
            rate_hz: config.rate,
            divisor: 29,
            state: PortState::Closed,
            usb_open: false,
            last_error: None,
            close_delay: CLOSE_FLUSH_DELAY,
        }
    }

    /// Altera o atraso aplicado no close
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Barramento subjacente
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Divisor calculado no último `init`
    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    fn is_auto(&self) -> bool {
        self.output.eq_ignore_ascii_case(AUTO_SETTING)
    }

    fn open_device(&mut self) -> DeviceResult<()> {
        debug!(device = %self.output, auto = self.is_auto(), "Opening FTDI device");

        if self.is_auto() {
            let devices = self
                .bus
                .find_all(ANY_VENDOR, ANY_PRODUCT)
                .map_err(DeviceError::Hardware)?;
            let first = devices
                .first()
                .ok_or_else(|| DeviceError::NoDevice("No ftdi devices detected".into()))?;
            self.bus.open_device(first).map_err(DeviceError::Hardware)?;
        } else {
            let output = self.output.clone();
            self.bus.open_string(&output).map_err(DeviceError::Hardware)?;
        }

        self.usb_open = true;
        Ok(())
    }

    fn handshake(&mut self) -> DeviceResult<()> {
        self.open_device()?;

        // desligar o bit-bang reseta o chip se ele ficou em estado ruim
        self.bus.disable_bitbang().map_err(DeviceError::Hardware)?;
        self.bus
            .set_flow_control(mpsse::SIO_DISABLE_FLOW_CTRL)
            .map_err(DeviceError::Hardware)?;
        self.bus
            .set_bitmode(0x00, mpsse::BITMODE_RESET)
            .map_err(DeviceError::Hardware)?;
        self.bus
            .set_bitmode(0xff, mpsse::BITMODE_MPSSE)
            .map_err(DeviceError::Hardware)?;

        self.checked_write(WriteStage::Setup, &mpsse::setup_burst(self.divisor))
    }

    fn checked_write(&mut self, stage: WriteStage, data: &[u8]) -> DeviceResult<()> {
        match self.bus.write_data(data) {
            Ok(written) if written == data.len() => Ok(()),
            Ok(written) => Err(DeviceError::ShortWrite {
                stage,
                expected: data.len(),
                written,
                message: self.bus.error_string(),
            }),
            Err(msg) => Err(DeviceError::Hardware(msg)),
        }
    }

    fn transmit(&mut self, header: &[u8], frame: &[u8]) -> DeviceResult<()> {
        self.checked_write(WriteStage::Header, header)?;
        self.checked_write(WriteStage::Payload, frame)?;
        self.checked_write(WriteStage::Trailer, &mpsse::frame_trailer())
    }

    /// Fecha a porta e a deixa em Error com a mensagem do fabricante
    fn set_in_error(&mut self, err: &DeviceError) {
        let message = vendor_message(err);
        error!(device = %self.output, error = %message, "FTDI device error");

        self.close();
        self.state = PortState::Error;
        self.last_error = Some(message);
    }
}

impl<B: FtdiBus> DeviceOutputPort for FtdiProvider<B> {
    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn init(&mut self, config: &DeviceConfig) -> DeviceResult<()> {
        if self.state == PortState::Ready {
            return Err(DeviceError::InvalidState(
                "cannot reconfigure an open port".into(),
            ));
        }

        config.validate()?;
        self.divisor = mpsse::clock_divisor(mpsse::REFERENCE_CLOCK_HZ, config.rate)?;
        self.device_type = config.device_type.clone();
        self.output = config.output.clone();
        self.rate_hz = config.rate;

        debug!(rate_hz = self.rate_hz, divisor = self.divisor, device = %self.output, "FTDI port configured");
        Ok(())
    }

    fn open(&mut self) -> DeviceResult<()> {
        match self.state {
            PortState::Ready => return Ok(()),
            PortState::Error => {
                return Err(DeviceError::InvalidState(
                    "port is in error state; close it before reopening".into(),
                ));
            }
            PortState::Closed => {}
        }

        if let Err(err) = self.handshake() {
            self.set_in_error(&err);
            return Err(err);
        }

        self.state = PortState::Ready;
        self.last_error = None;
        info!(device = %self.output, rate_hz = self.rate_hz, "FTDI device ready");
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> DeviceResult<()> {
        if self.state != PortState::Ready {
            return Err(DeviceError::InvalidState(format!(
                "cannot write to a {:?} port",
                self.state
            )));
        }
        if frame.is_empty() {
            return Ok(());
        }

        let header = mpsse::frame_header(frame.len())?;
        if let Err(err) = self.transmit(&header, frame) {
            self.set_in_error(&err);
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) {
        debug!(device = %self.output, "Closing FTDI device");

        if self.state == PortState::Ready && !self.close_delay.is_zero() {
            std::thread::sleep(self.close_delay);
        }

        if let Err(msg) = self.bus.set_bitmode(0x00, mpsse::BITMODE_RESET) {
            debug!(error = %msg, "bit mode reset on close failed");
        }
        if self.usb_open {
            if let Err(msg) = self.bus.usb_close() {
                warn!(error = %msg, "USB close failed");
            }
            self.usb_open = false;
        }

        self.state = PortState::Closed;
    }

    fn discover(&mut self, _params: &serde_json::Value) -> DiscoveryResult {
        let mut devices = vec![DiscoveredDevice {
            value: AUTO_SETTING.to_string(),
            name: "Auto".to_string(),
        }];

        match self.bus.find_all(ANY_VENDOR, ANY_PRODUCT) {
            Ok(found) => devices.extend(open_strings(&found)),
            Err(msg) => warn!(error = %msg, "FTDI enumeration failed"),
        }

        let result = DiscoveryResult {
            led_device_type: self.device_type.clone(),
            devices,
        };
        debug!(count = result.devices.len() - 1, "FTDI devices discovered");
        result
    }

    fn state(&self) -> PortState {
        self.state
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl<B: FtdiBus> Drop for FtdiProvider<B> {
    fn drop(&mut self) {
        if self.usb_open {
            self.close();
        }
    }
}
