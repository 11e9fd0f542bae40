//! Contrato de porta de saída de hardware

use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::error::DeviceResult;

/// Estado de uma porta
///
/// ```text
/// Closed --open ok--> Ready --close--> Closed
///                     Ready --falha--> Error --close--> Closed
/// ```
///
/// Não existe Closed -> Error nem Error -> Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PortState {
    #[default]
    Closed,
    Ready,
    Error,
}

/// Um dispositivo encontrado pela descoberta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// String de abertura estável
    pub value: String,
    /// Rótulo legível
    pub name: String,
}

/// Resultado da descoberta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub led_device_type: String,
    pub devices: Vec<DiscoveredDevice>,
}

/// Porta de saída de LEDs
///
/// Pertence exclusivamente a uma instância. Todas as operações são
/// síncronas e bloqueantes; o chamador as executa em um worker dedicado.
pub trait DeviceOutputPort: Send {
    /// Família do dispositivo
    fn device_type(&self) -> &str;

    /// Valida e armazena a configuração (não toca o hardware)
    fn init(&mut self, config: &DeviceConfig) -> DeviceResult<()>;

    /// Executa o handshake; Ready em caso de sucesso
    fn open(&mut self) -> DeviceResult<()>;

    /// Transmite um frame de forma síncrona
    fn write(&mut self, frame: &[u8]) -> DeviceResult<()>;

    /// Libera o hardware; seguro em qualquer estado
    fn close(&mut self);

    /// Enumera dispositivos conectados sem manter handle aberto
    fn discover(&mut self, params: &serde_json::Value) -> DiscoveryResult;

    /// Estado atual
    fn state(&self) -> PortState;

    /// Última mensagem de erro do fabricante
    fn last_error(&self) -> Option<&str>;

    fn is_ready(&self) -> bool {
        self.state() == PortState::Ready
    }

    /// Escreve cores RGB como bytes `r g b` consecutivos
    fn write_colors(&mut self, colors: &[RGB8]) -> DeviceResult<()> {
        let bytes: Vec<u8> = colors.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
        self.write(&bytes)
    }
}

impl std::fmt::Debug for dyn DeviceOutputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOutputPort")
            .field("device_type", &self.device_type())
            .field("state", &self.state())
            .finish()
    }
}
