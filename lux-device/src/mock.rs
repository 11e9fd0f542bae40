//! Barramento FTDI em memória
//!
//! Registra cada chamada e cada byte escrito, e permite injetar falhas em
//! qualquer etapa. Clonar o mock compartilha o mesmo estado, então o teste
//! mantém um clone depois de entregar o outro ao `FtdiProvider`.
//!
//! ```
//! use lux_device::{DeviceConfig, DeviceOutputPort, FtdiProvider, MockFtdiBus};
//!
//! let bus = MockFtdiBus::with_devices(vec![MockFtdiBus::device(0x0403, 0x6014, "A1")]);
//! let observer = bus.clone();
//! let mut port = FtdiProvider::new(bus);
//! port.init(&DeviceConfig::default()).unwrap();
//! port.open().unwrap();
//! port.write(&[1, 2, 3]).unwrap();
//! assert_eq!(observer.writes().last().unwrap(), &vec![0x80, 0x08, 0x0b]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use crate::ftdi::{FtdiBus, UsbDeviceInfo};

/// Operação do barramento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    FindAll,
    Open,
    DisableBitbang,
    SetFlowControl,
    SetBitmode,
    WriteData,
    UsbClose,
}

/// Chamada registrada
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    FindAll,
    OpenDevice(usize),
    OpenString(String),
    DisableBitbang,
    SetFlowControl(u16),
    SetBitmode { mask: u8, mode: u8 },
    Write(Vec<u8>),
    UsbClose,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<UsbDeviceInfo>,
    calls: Vec<BusCall>,
    open: bool,
    writes_seen: usize,
    fail_once: Vec<(BusOp, String)>,
    short_write_at: Option<usize>,
    last_error: String,
}

/// Barramento simulado
#[derive(Debug, Clone, Default)]
pub struct MockFtdiBus {
    state: Arc<Mutex<MockState>>,
}

impl MockFtdiBus {
    /// Barramento sem dispositivos
    pub fn new() -> Self {
        Self::default()
    }

    /// Barramento com os dispositivos dados (em ordem de enumeração)
    pub fn with_devices(devices: Vec<UsbDeviceInfo>) -> Self {
        let bus = Self::new();
        bus.lock().devices = devices
            .into_iter()
            .enumerate()
            .map(|(index, device)| UsbDeviceInfo { index, ..device })
            .collect();
        bus
    }

    /// Atalho para montar um `UsbDeviceInfo`
    pub fn device(vendor_id: u16, product_id: u16, serial: &str) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id,
            product_id,
            manufacturer: "FTDI".to_string(),
            serial: serial.to_string(),
            index: 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // um teste que entrou em pânico com o lock não invalida os demais
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Próxima chamada de `op` falha com `message`
    pub fn fail_next(&self, op: BusOp, message: &str) {
        self.lock().fail_once.push((op, message.to_string()));
    }

    /// A escrita de número `skip` (contando a partir de agora, base 0) aceita
    /// um byte a menos que o pedido
    pub fn short_write_after(&self, skip: usize) {
        let mut state = self.lock();
        state.short_write_at = Some(state.writes_seen + skip);
    }

    /// Chamadas registradas
    pub fn calls(&self) -> Vec<BusCall> {
        self.lock().calls.clone()
    }

    /// Apenas os buffers escritos
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BusCall::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Esquece as chamadas registradas
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Handle USB aberto?
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn take_failure(state: &mut MockState, op: BusOp) -> Option<String> {
        let position = state.fail_once.iter().position(|(o, _)| *o == op)?;
        let (_, message) = state.fail_once.remove(position);
        state.last_error = message.clone();
        Some(message)
    }

    fn record(&self, call: BusCall, op: BusOp) -> Result<(), String> {
        let mut state = self.lock();
        state.calls.push(call);
        match Self::take_failure(&mut state, op) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

impl FtdiBus for MockFtdiBus {
    fn find_all(&mut self, vendor: u16, product: u16) -> Result<Vec<UsbDeviceInfo>, String> {
        self.record(BusCall::FindAll, BusOp::FindAll)?;
        let state = self.lock();
        Ok(state
            .devices
            .iter()
            .filter(|d| (vendor == 0 || d.vendor_id == vendor) && (product == 0 || d.product_id == product))
            .cloned()
            .collect())
    }

    fn open_device(&mut self, device: &UsbDeviceInfo) -> Result<(), String> {
        self.record(BusCall::OpenDevice(device.index), BusOp::Open)?;
        self.lock().open = true;
        Ok(())
    }

    fn open_string(&mut self, description: &str) -> Result<(), String> {
        self.record(BusCall::OpenString(description.to_string()), BusOp::Open)?;
        let mut state = self.lock();
        let known = state.devices.iter().any(|d| {
            let vp = d.vendor_and_product();
            description == format!("s:{}:{}", vp, d.serial)
                || description.starts_with(&format!("i:{}:", vp))
        });
        if !known {
            state.last_error = "device not found".to_string();
            return Err(state.last_error.clone());
        }
        state.open = true;
        Ok(())
    }

    fn disable_bitbang(&mut self) -> Result<(), String> {
        self.record(BusCall::DisableBitbang, BusOp::DisableBitbang)
    }

    fn set_flow_control(&mut self, flow: u16) -> Result<(), String> {
        self.record(BusCall::SetFlowControl(flow), BusOp::SetFlowControl)
    }

    fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<(), String> {
        self.record(BusCall::SetBitmode { mask, mode }, BusOp::SetBitmode)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize, String> {
        self.record(BusCall::Write(data.to_vec()), BusOp::WriteData)?;

        let mut state = self.lock();
        let current = state.writes_seen;
        state.writes_seen += 1;

        if state.short_write_at == Some(current) {
            state.short_write_at = None;
            state.last_error = "usb bulk write timed out".to_string();
            return Ok(data.len().saturating_sub(1));
        }
        Ok(data.len())
    }

    fn usb_close(&mut self) -> Result<(), String> {
        let result = self.record(BusCall::UsbClose, BusOp::UsbClose);
        self.lock().open = false;
        result
    }

    fn error_string(&self) -> String {
        self.lock().last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_state() {
        let bus = MockFtdiBus::new();
        let mut handle = bus.clone();
        handle.disable_bitbang().unwrap();
        assert_eq!(bus.calls(), vec![BusCall::DisableBitbang]);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let mut bus = MockFtdiBus::new();
        bus.fail_next(BusOp::SetBitmode, "pipe error");
        assert_eq!(bus.set_bitmode(0, 0), Err("pipe error".to_string()));
        assert!(bus.set_bitmode(0, 0).is_ok());
        assert_eq!(bus.error_string(), "pipe error");
    }

    #[test]
    fn test_short_write_after() {
        let mut bus = MockFtdiBus::new();
        bus.short_write_after(1);
        assert_eq!(bus.write_data(&[1, 2, 3]), Ok(3));
        assert_eq!(bus.write_data(&[1, 2, 3]), Ok(2));
        assert_eq!(bus.write_data(&[1, 2, 3]), Ok(3));
    }

    #[test]
    fn test_enumeration_assigns_indexes() {
        let mut bus = MockFtdiBus::with_devices(vec![
            MockFtdiBus::device(0x0403, 0x6014, ""),
            MockFtdiBus::device(0x0403, 0x6010, ""),
        ]);
        let found = bus.find_all(0, 0).unwrap();
        assert_eq!(found[1].index, 1);

        let filtered = bus.find_all(0x0403, 0x6010).unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
