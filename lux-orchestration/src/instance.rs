//! Instância de iluminação e seu worker de dispositivo
//!
//! Cada instância roda em uma thread própria que possui a
//! [`DeviceOutputPort`]. O handle [`Instance`] só envia comandos; toda E/S
//! de hardware acontece no worker, então um dispositivo travado não atrasa
//! o loop de controle.
//!
//! ```text
//!  Instance ──InstanceCommand──▶ worker ──write()──▶ DeviceOutputPort
//!                                   │
//!                                   └──InstanceEvent (Stopped/Faulted)──▶ orquestrador
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use lux_core::{Component, InstanceId};
use lux_device::{DeviceOutputPort, RGB8};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestrationError, OrchestrationResult};

/// Comando para o worker de uma instância
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceCommand {
    /// Frame de cores a transmitir
    Frame(Vec<RGB8>),
    /// Pausa (apaga os LEDs) ou retoma
    SetPaused(bool),
    /// Liga/desliga um componente do pipeline
    SetComponent { component: Component, enable: bool },
    /// Dados de calibração
    Calibration(serde_json::Value),
    /// Encerra: frame preto, close, e `InstanceEvent::Stopped`
    Stop,
}

/// Evento de uma instância para o orquestrador
#[derive(Debug)]
pub enum InstanceEvent {
    /// Construção assíncrona terminou
    Constructed {
        id: InstanceId,
        result: OrchestrationResult<Instance>,
    },
    /// Worker encerrou após um Stop
    Stopped { id: InstanceId, name: String },
    /// Falha de hardware; o worker fechou a porta e encerrou
    Faulted {
        id: InstanceId,
        name: String,
        message: String,
    },
}

impl InstanceEvent {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            InstanceEvent::Constructed { id, .. }
            | InstanceEvent::Stopped { id, .. }
            | InstanceEvent::Faulted { id, .. } => *id,
        }
    }
}

/// Estado compartilhado entre handle e worker
#[derive(Debug)]
pub(crate) struct SharedState {
    paused: AtomicBool,
    average: Mutex<Option<RGB8>>,
    components: Mutex<BTreeMap<Component, bool>>,
    calibration: Mutex<Option<serde_json::Value>>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            average: Mutex::new(None),
            components: Mutex::new(Component::INDIVIDUAL.iter().map(|c| (*c, true)).collect()),
            calibration: Mutex::new(None),
        }
    }

    fn component_enabled(&self, component: Component) -> bool {
        self.components
            .lock()
            .map(|c| c.get(&component).copied().unwrap_or(true))
            .unwrap_or(true)
    }

    fn set_component(&self, component: Component, enable: bool) {
        if let Ok(mut components) = self.components.lock() {
            if component == Component::All {
                for value in components.values_mut() {
                    *value = enable;
                }
            } else {
                components.insert(component, enable);
            }
        }
    }
}

/// Média das cores de um frame
pub fn average_color(colors: &[RGB8]) -> Option<RGB8> {
    if colors.is_empty() {
        return None;
    }
    let (r, g, b) = colors.iter().fold((0u32, 0u32, 0u32), |(r, g, b), c| {
        (r + u32::from(c.r), g + u32::from(c.g), b + u32::from(c.b))
    });
    let n = colors.len() as u32;
    Some(RGB8::new((r / n) as u8, (g / n) as u8, (b / n) as u8))
}

/// Handle de uma instância em execução
pub struct Instance {
    id: InstanceId,
    name: String,
    commands: Sender<InstanceCommand>,
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
    stop_requested: bool,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("paused", &self.is_paused())
            .field("stop_requested", &self.stop_requested)
            .finish()
    }
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        name: String,
        commands: Sender<InstanceCommand>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            id,
            name,
            commands,
            shared,
            worker: None,
            stop_requested: false,
        }
    }

    pub(crate) fn attach_worker(&mut self, worker: JoinHandle<()>) {
        self.worker = Some(worker);
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn send(&self, command: InstanceCommand) -> OrchestrationResult<()> {
        self.commands
            .send(command)
            .map_err(|_| OrchestrationError::WorkerLost(self.id))
    }

    /// Entrega um frame ao worker (não bloqueia)
    pub fn push_frame(&self, colors: Vec<RGB8>) -> OrchestrationResult<()> {
        self.send(InstanceCommand::Frame(colors))
    }

    pub fn set_paused(&self, paused: bool) -> OrchestrationResult<()> {
        self.send(InstanceCommand::SetPaused(paused))
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn set_component(&self, component: Component, enable: bool) -> OrchestrationResult<()> {
        self.send(InstanceCommand::SetComponent { component, enable })
    }

    pub fn component_enabled(&self, component: Component) -> bool {
        self.shared.component_enabled(component)
    }

    pub fn send_calibration(&self, data: serde_json::Value) -> OrchestrationResult<()> {
        self.send(InstanceCommand::Calibration(data))
    }

    /// Última calibração aplicada pelo worker
    pub fn calibration(&self) -> Option<serde_json::Value> {
        self.shared.calibration.lock().ok().and_then(|c| c.clone())
    }

    /// Média do último frame transmitido
    pub fn average_color(&self) -> Option<RGB8> {
        self.shared.average.lock().ok().and_then(|a| *a)
    }

    /// Pede o encerramento; o resultado chega como `InstanceEvent::Stopped`
    pub fn request_stop(&mut self) -> bool {
        if self.stop_requested {
            return false;
        }
        self.stop_requested = true;
        self.send(InstanceCommand::Stop).is_ok()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Aguarda o fim do worker
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(instance = self.id, "Instance worker panicked");
            }
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Sem join: o worker pode estar bloqueado no hardware
        if !self.stop_requested {
            let _ = self.commands.send(InstanceCommand::Stop);
        }
    }
}

/// Loop do worker; roda na thread da instância até Stop ou falha
pub(crate) struct Worker {
    pub id: InstanceId,
    pub name: String,
    pub port: Box<dyn DeviceOutputPort>,
    pub led_count: usize,
    pub commands: Receiver<InstanceCommand>,
    pub events: UnboundedSender<InstanceEvent>,
    pub shared: Arc<SharedState>,
}

impl Worker {
    fn black_frame(&self) -> Vec<RGB8> {
        vec![RGB8::default(); self.led_count]
    }

    fn output_enabled(&self) -> bool {
        !self.shared.paused.load(Ordering::SeqCst) && self.shared.component_enabled(Component::LedDevice)
    }

    /// Escreve um frame; `Err` carrega a mensagem do fabricante
    fn transmit(&mut self, colors: &[RGB8]) -> Result<(), String> {
        self.port.write_colors(colors).map_err(|err| {
            self.port
                .last_error()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string())
        })
    }

    pub fn run(mut self) {
        info!(instance = self.id, name = %self.name, "Instance worker started");

        while let Ok(command) = self.commands.recv() {
            let result = match command {
                InstanceCommand::Frame(colors) => {
                    if !self.output_enabled() {
                        continue;
                    }
                    let result = self.transmit(&colors);
                    if result.is_ok() {
                        if let Ok(mut average) = self.shared.average.lock() {
                            *average = average_color(&colors);
                        }
                    }
                    result
                }
                InstanceCommand::SetPaused(paused) => {
                    self.shared.paused.store(paused, Ordering::SeqCst);
                    debug!(instance = self.id, paused, "Instance pause toggled");
                    if paused {
                        let black = self.black_frame();
                        self.transmit(&black)
                    } else {
                        Ok(())
                    }
                }
                InstanceCommand::SetComponent { component, enable } => {
                    self.shared.set_component(component, enable);
                    let led_off = !enable && matches!(component, Component::LedDevice | Component::All);
                    if led_off {
                        let black = self.black_frame();
                        self.transmit(&black)
                    } else {
                        Ok(())
                    }
                }
                InstanceCommand::Calibration(data) => {
                    debug!(instance = self.id, "Calibration received");
                    if let Ok(mut calibration) = self.shared.calibration.lock() {
                        *calibration = Some(data);
                    }
                    Ok(())
                }
                InstanceCommand::Stop => break,
            };

            if let Err(message) = result {
                error!(instance = self.id, error = %message, "Instance output fault");
                self.port.close();
                let _ = self.events.send(InstanceEvent::Faulted {
                    id: self.id,
                    name: self.name.clone(),
                    message,
                });
                return;
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.port.is_ready() {
            let black = self.black_frame();
            if let Err(message) = self.transmit(&black) {
                warn!(instance = self.id, error = %message, "Final black frame failed");
            }
        }
        self.port.close();
        info!(instance = self.id, name = %self.name, "Instance worker stopped");

        let _ = self.events.send(InstanceEvent::Stopped {
            id: self.id,
            name: self.name.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_color() {
        let colors = [RGB8::new(0, 100, 255), RGB8::new(10, 50, 1)];
        assert_eq!(average_color(&colors), Some(RGB8::new(5, 75, 128)));
        assert_eq!(average_color(&[]), None);
    }

    #[test]
    fn test_component_toggle_all() {
        let shared = SharedState::new();
        shared.set_component(Component::All, false);
        assert!(!shared.component_enabled(Component::LedDevice));
        assert!(!shared.component_enabled(Component::Smoothing));

        shared.set_component(Component::Smoothing, true);
        assert!(shared.component_enabled(Component::Smoothing));
    }

    #[test]
    fn test_request_stop_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut instance = Instance::new(1, "Desk".into(), tx, Arc::new(SharedState::new()));

        assert!(instance.request_stop());
        assert!(!instance.request_stop());
        drop(instance);

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![InstanceCommand::Stop]);
    }

    #[test]
    fn test_lost_worker() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let instance = Instance::new(4, "Desk".into(), tx, Arc::new(SharedState::new()));
        assert_eq!(instance.push_frame(vec![]), Err(OrchestrationError::WorkerLost(4)));
    }
}
