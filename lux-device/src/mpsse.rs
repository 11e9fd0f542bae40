//! Protocolo MPSSE (emulação de SPI por bit-bang)
//!
//! Codificadores puros dos bursts enviados ao bridge USB. Nenhuma função
//! aqui toca o hardware; `FtdiProvider` apenas escreve os bytes gerados.
//!
//! ```text
//!  open:   DIS_DIV_5 | TCK_DIVISOR lo hi | SET_BITS_LOW idle dir
//!  frame:  SET_BITS_LOW (idle & !CS) dir | DO_WRITE|WRITE_NEG (L-1)lo (L-1)hi
//!          <L bytes de payload>
//!          SET_BITS_LOW (idle | CS) dir
//! ```

use crate::error::{DeviceError, DeviceResult};

/// Clock de referência do engine MPSSE (Hz)
pub const REFERENCE_CLOCK_HZ: u32 = 60_000_000;

/// Linhas do barramento AD
pub mod pin {
    /// ADBUS0, clock SPI
    pub const SK: u8 = 0x01;
    /// ADBUS1, dados de saída
    pub const DO: u8 = 0x02;
    /// ADBUS3, chip-select (ativo em nível baixo)
    pub const CS: u8 = 0x08;
}

/// Nível ocioso: apenas CS em alto (inativo)
pub const PIN_IDLE_LEVEL: u8 = pin::CS;
/// Direção: SK, DO e CS como saídas, demais linhas como entradas
pub const PIN_DIRECTION: u8 = pin::SK | pin::DO | pin::CS;

/// Desliga o divisor por 5 do clock
pub const DIS_DIV_5: u8 = 0x8a;
/// Define o divisor do clock
pub const TCK_DIVISOR: u8 = 0x86;
/// Define nível/direção dos 8 bits baixos
pub const SET_BITS_LOW: u8 = 0x80;
/// Escrita serial com clock
pub const MPSSE_DO_WRITE: u8 = 0x10;
/// Dados mudam na borda de descida
pub const MPSSE_WRITE_NEG: u8 = 0x01;

/// Modo bit-bang: reset
pub const BITMODE_RESET: u8 = 0x00;
/// Modo bit-bang: engine MPSSE
pub const BITMODE_MPSSE: u8 = 0x02;
/// Controle de fluxo desligado
pub const SIO_DISABLE_FLOW_CTRL: u16 = 0x0;

/// Maior payload aceito por um campo de comprimento de 16 bits
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize + 1;

/// Tamanho do burst de configuração
pub const SETUP_BURST_LEN: usize = 7;
/// Tamanho do cabeçalho de frame
pub const FRAME_HEADER_LEN: usize = 6;
/// Tamanho do trailer de frame
pub const FRAME_TRAILER_LEN: usize = 3;

/// `floor(reference / 2 / baud) - 1`
pub fn clock_divisor(reference_hz: u32, baud_hz: u32) -> DeviceResult<u16> {
    if baud_hz == 0 {
        return Err(DeviceError::InvalidConfig("rate must be greater than 0 Hz".into()));
    }

    let half_period = reference_hz / 2 / baud_hz;
    if half_period == 0 {
        return Err(DeviceError::InvalidConfig(format!(
            "rate {} Hz exceeds the maximum of {} Hz",
            baud_hz,
            reference_hz / 2
        )));
    }

    u16::try_from(half_period - 1).map_err(|_| {
        DeviceError::InvalidConfig(format!("rate {} Hz is too low for the clock divisor", baud_hz))
    })
}

/// Burst enviado ao final do handshake
pub fn setup_burst(divisor: u16) -> [u8; SETUP_BURST_LEN] {
    let [lo, hi] = divisor.to_le_bytes();
    [
        DIS_DIV_5,
        TCK_DIVISOR,
        lo,
        hi,
        SET_BITS_LOW,
        PIN_IDLE_LEVEL,
        PIN_DIRECTION,
    ]
}

/// Ativa CS e anuncia `len` bytes (campo = `len - 1`, little-endian)
pub fn frame_header(len: usize) -> DeviceResult<[u8; FRAME_HEADER_LEN]> {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return Err(DeviceError::InvalidConfig(format!(
            "frame length {} outside 1..={}",
            len, MAX_PAYLOAD_LEN
        )));
    }

    let [lo, hi] = ((len - 1) as u16).to_le_bytes();
    Ok([
        SET_BITS_LOW,
        PIN_IDLE_LEVEL & !pin::CS,
        PIN_DIRECTION,
        MPSSE_DO_WRITE | MPSSE_WRITE_NEG,
        lo,
        hi,
    ])
}

/// Desativa CS (volta ao nível ocioso)
pub fn frame_trailer() -> [u8; FRAME_TRAILER_LEN] {
    [SET_BITS_LOW, PIN_IDLE_LEVEL | pin::CS, PIN_DIRECTION]
}
