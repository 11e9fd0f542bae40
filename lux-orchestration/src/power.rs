//! Ponte de eventos de energia do sistema operacional
//!
//! A origem (broadcast de energia, sinal Unix, D-Bus) é externa. Ela só
//! precisa chamar [`PowerEventBridge::notify`]; o loop de controle entrega o
//! evento a `InstanceOrchestrator::hibernate`.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

/// Código de broadcast de energia: sistema vai suspender
pub const PBT_APMSUSPEND: u32 = 0x4;
/// Código de broadcast de energia: retorno de suspensão iniciado pelo usuário
pub const PBT_APMRESUMESUSPEND: u32 = 0x7;

/// Transição de energia do host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
}

impl PowerEvent {
    /// Mapeia um código de broadcast de energia; outros códigos são ignorados
    pub fn from_power_broadcast(code: u32) -> Option<Self> {
        match code {
            PBT_APMSUSPEND => Some(PowerEvent::Suspend),
            PBT_APMRESUMESUSPEND => Some(PowerEvent::Resume),
            _ => None,
        }
    }

    /// Argumento `wake_up` de `hibernate`
    pub fn is_resume(self) -> bool {
        self == PowerEvent::Resume
    }
}

/// Lado emissor da ponte
#[derive(Debug, Clone)]
pub struct PowerEventBridge {
    sender: UnboundedSender<PowerEvent>,
}

impl PowerEventBridge {
    /// Cria a ponte e o receiver consumido pelo loop de controle
    pub fn channel() -> (Self, UnboundedReceiver<PowerEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// `hibernate(resuming)` do lado externo
    pub fn notify(&self, resuming: bool) -> bool {
        let event = if resuming { PowerEvent::Resume } else { PowerEvent::Suspend };
        debug!(?event, "Power event");
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!(?event, "Power event dropped: control loop is gone");
                false
            }
        }
    }

    /// Entrega um código de broadcast de energia cru
    pub fn notify_broadcast(&self, code: u32) -> bool {
        match PowerEvent::from_power_broadcast(code) {
            Some(event) => self.notify(event.is_resume()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_codes() {
        assert_eq!(PowerEvent::from_power_broadcast(0x4), Some(PowerEvent::Suspend));
        assert_eq!(PowerEvent::from_power_broadcast(0x7), Some(PowerEvent::Resume));
        assert_eq!(PowerEvent::from_power_broadcast(0x12), None);
    }

    #[test]
    fn test_bridge_delivers_in_order() {
        let (bridge, mut rx) = PowerEventBridge::channel();
        assert!(bridge.notify(false));
        assert!(bridge.notify_broadcast(PBT_APMRESUMESUSPEND));
        assert!(!bridge.notify_broadcast(0x8));

        assert_eq!(rx.try_recv().unwrap(), PowerEvent::Suspend);
        assert_eq!(rx.try_recv().unwrap(), PowerEvent::Resume);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_bridge() {
        let (bridge, rx) = PowerEventBridge::channel();
        drop(rx);
        assert!(!bridge.notify(true));
    }
}
