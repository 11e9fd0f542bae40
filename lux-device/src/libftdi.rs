//! Barramento FTDI real via libftdi1
//!
//! Disponível com a feature `libftdi`. Cada `LibFtdiBus` possui um contexto
//! `ftdi_context` próprio, liberado no `Drop`.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

use libftdi1_sys as ffi;

use crate::error::{DeviceError, DeviceResult};
use crate::ftdi::{FtdiBus, UsbDeviceInfo};

const STRING_LEN: usize = 128;

/// Contexto libftdi
pub struct LibFtdiBus {
    context: *mut ffi::ftdi_context,
}

// SAFETY: o contexto pertence exclusivamente a este valor e só é usado
// pela thread que o possui no momento
unsafe impl Send for LibFtdiBus {}

impl LibFtdiBus {
    /// Aloca um contexto novo
    pub fn new() -> DeviceResult<Self> {
        // SAFETY: ftdi_new não tem pré-condições
        let context = unsafe { ffi::ftdi_new() };
        if context.is_null() {
            return Err(DeviceError::Hardware("ftdi_new failed".into()));
        }
        Ok(Self { context })
    }

    fn check(&self, rc: c_int) -> Result<(), String> {
        if rc < 0 { Err(self.error_string()) } else { Ok(()) }
    }

    fn c_string(buf: &[c_char]) -> String {
        // SAFETY: buffers são zerados e recebem no máximo STRING_LEN - 1 bytes
        unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
    }

    /// Percorre a lista de dispositivos; a lista é liberada antes de retornar
    fn with_device_list<T>(
        &mut self,
        vendor: u16,
        product: u16,
        mut visit: impl FnMut(&mut Self, usize, *mut ffi::ftdi_device_list) -> Option<T>,
    ) -> Result<Option<T>, String> {
        let mut list: *mut ffi::ftdi_device_list = ptr::null_mut();
        // SAFETY: contexto válido; `list` recebe a lista alocada pela biblioteca
        let rc = unsafe {
            ffi::ftdi_usb_find_all(self.context, &mut list, c_int::from(vendor), c_int::from(product))
        };
        if rc < 0 {
            return Err(self.error_string());
        }

        let mut result = None;
        let mut current = list;
        let mut index = 0;
        while !current.is_null() {
            result = visit(self, index, current);
            if result.is_some() {
                break;
            }
            // SAFETY: `current` aponta para um nó válido da lista
            current = unsafe { (*current).next };
            index += 1;
        }

        // SAFETY: lista devolvida por ftdi_usb_find_all
        unsafe { ffi::ftdi_list_free(&mut list) };
        Ok(result)
    }
}

impl FtdiBus for LibFtdiBus {
    fn find_all(&mut self, vendor: u16, product: u16) -> Result<Vec<UsbDeviceInfo>, String> {
        let mut devices = Vec::new();
        self.with_device_list(vendor, product, |bus, index, node| {
            let mut manufacturer = [0 as c_char; STRING_LEN];
            let mut serial = [0 as c_char; STRING_LEN];
            // SAFETY: nó válido; buffers com o tamanho informado
            let dev = unsafe { (*node).dev };
            unsafe {
                ffi::ftdi_usb_get_strings(
                    bus.context,
                    dev,
                    manufacturer.as_mut_ptr(),
                    STRING_LEN as c_int,
                    ptr::null_mut(),
                    0,
                    serial.as_mut_ptr(),
                    STRING_LEN as c_int,
                );
            }

            let mut descriptor = std::mem::MaybeUninit::<libusb1_sys::libusb_device_descriptor>::zeroed();
            // SAFETY: dispositivo válido enquanto a lista não for liberada
            let rc = unsafe { libusb1_sys::libusb_get_device_descriptor(dev.cast(), descriptor.as_mut_ptr()) };
            if rc == 0 {
                // SAFETY: preenchido por libusb_get_device_descriptor
                let descriptor = unsafe { descriptor.assume_init() };
                devices.push(UsbDeviceInfo {
                    vendor_id: descriptor.idVendor,
                    product_id: descriptor.idProduct,
                    manufacturer: Self::c_string(&manufacturer),
                    serial: Self::c_string(&serial),
                    index,
                });
            }
            None::<()>
        })?;
        Ok(devices)
    }

    fn open_device(&mut self, device: &UsbDeviceInfo) -> Result<(), String> {
        let opened = self.with_device_list(0, 0, |bus, index, node| {
            if index != device.index {
                return None;
            }
            // SAFETY: nó válido da lista atual
            let rc = unsafe { ffi::ftdi_usb_open_dev(bus.context, (*node).dev) };
            Some(bus.check(rc))
        })?;

        opened.unwrap_or_else(|| Err("device disappeared before open".to_string()))
    }

    fn open_string(&mut self, description: &str) -> Result<(), String> {
        let description = CString::new(description).map_err(|e| e.to_string())?;
        // SAFETY: contexto válido; string terminada em zero
        let rc = unsafe { ffi::ftdi_usb_open_string(self.context, description.as_ptr()) };
        self.check(rc)
    }

    fn disable_bitbang(&mut self) -> Result<(), String> {
        // SAFETY: contexto válido
        let rc = unsafe { ffi::ftdi_disable_bitbang(self.context) };
        self.check(rc)
    }

    fn set_flow_control(&mut self, flow: u16) -> Result<(), String> {
        // SAFETY: contexto válido
        let rc = unsafe { ffi::ftdi_setflowctrl(self.context, c_int::from(flow)) };
        self.check(rc)
    }

    fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<(), String> {
        // SAFETY: contexto válido
        let rc = unsafe { ffi::ftdi_set_bitmode(self.context, mask, mode) };
        self.check(rc)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize, String> {
        let len = c_int::try_from(data.len()).map_err(|e| e.to_string())?;
        // SAFETY: contexto válido; `data` vive durante a chamada
        let rc = unsafe { ffi::ftdi_write_data(self.context, data.as_ptr(), len) };
        if rc < 0 {
            return Err(self.error_string());
        }
        Ok(rc as usize)
    }

    fn usb_close(&mut self) -> Result<(), String> {
        // SAFETY: contexto válido
        let rc = unsafe { ffi::ftdi_usb_close(self.context) };
        self.check(rc)
    }

    fn error_string(&self) -> String {
        // SAFETY: a biblioteca devolve uma string estática ou nula
        let raw = unsafe { ffi::ftdi_get_error_string(self.context) };
        if raw.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }
}

impl Drop for LibFtdiBus {
    fn drop(&mut self) {
        // SAFETY: contexto alocado em `new` e ainda não liberado
        unsafe { ffi::ftdi_free(self.context) };
    }
}
