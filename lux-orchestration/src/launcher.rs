//! Construção assíncrona de instâncias
//!
//! `launch` devolve imediatamente. A thread do worker cria, configura e abre
//! a porta de saída; o resultado chega pelo `oneshot` de [`LaunchHandle`].
//! Depois de entregar o [`Instance`], a mesma thread passa a executar o loop
//! do worker. O canal de comandos nasce antes da thread: um `Stop` enviado
//! por [`LaunchHandle::stop`] durante a construção é o primeiro comando que o
//! worker lê.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use lux_core::{InstanceId, SettingsType};
use lux_device::{DeviceConfig, DeviceOutputPort, PortFactory};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::instance::{Instance, InstanceCommand, InstanceEvent, SharedState, Worker};
use crate::registry::InstanceSettings;

/// Construção em andamento
#[derive(Debug)]
pub struct LaunchHandle {
    pub id: InstanceId,
    /// Resolvido uma única vez, com a instância pronta ou a falha
    pub ready: oneshot::Receiver<OrchestrationResult<Instance>>,
    /// Thread do worker
    pub worker: JoinHandle<()>,
    /// Canal de comandos do worker, válido antes do `Instance` existir
    pub stop: Sender<InstanceCommand>,
}

impl LaunchHandle {
    /// Aguarda a construção e anexa a thread ao `Instance`
    pub async fn wait(self) -> OrchestrationResult<Instance> {
        let id = self.id;
        let mut instance = self.ready.await.map_err(|_| OrchestrationError::WorkerLost(id))??;
        instance.attach_worker(self.worker);
        Ok(instance)
    }
}

/// Dispara a construção de instâncias em threads dedicadas
#[derive(Clone)]
pub struct InstanceLauncher {
    factory: Arc<dyn PortFactory>,
    events: UnboundedSender<InstanceEvent>,
}

impl std::fmt::Debug for InstanceLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLauncher").finish_non_exhaustive()
    }
}

impl InstanceLauncher {
    pub fn new(factory: Arc<dyn PortFactory>, events: UnboundedSender<InstanceEvent>) -> Self {
        Self { factory, events }
    }

    /// Inicia a construção da instância `id`
    pub fn launch(
        &self,
        id: InstanceId,
        name: &str,
        settings: &InstanceSettings,
    ) -> OrchestrationResult<LaunchHandle> {
        let config = settings
            .get(&SettingsType::Device)
            .map(DeviceConfig::from_json)
            .unwrap_or_else(|| Ok(DeviceConfig::default()));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let stop = commands_tx.clone();
        let factory = Arc::clone(&self.factory);
        let events = self.events.clone();
        let name = name.to_string();

        let worker = std::thread::Builder::new()
            .name(format!("lux-instance-{}", id))
            .spawn(move || {
                let (port, led_count) = match prepare_port(factory.as_ref(), config) {
                    Ok(prepared) => prepared,
                    Err(err) => {
                        debug!(instance = id, error = %err, "Instance construction failed");
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let shared = Arc::new(SharedState::new());
                let instance = Instance::new(id, name.clone(), commands_tx, Arc::clone(&shared));

                // Se ninguém espera mais, o Instance descartado envia Stop
                let _ = ready_tx.send(Ok(instance));

                Worker {
                    id,
                    name,
                    port,
                    led_count,
                    commands: commands_rx,
                    events,
                    shared,
                }
                .run();
            })
            .map_err(|err| {
                warn!(instance = id, error = %err, "Cannot spawn instance worker");
                OrchestrationError::WorkerLost(id)
            })?;

        Ok(LaunchHandle {
            id,
            ready: ready_rx,
            worker,
            stop,
        })
    }
}

fn prepare_port(
    factory: &dyn PortFactory,
    config: lux_device::DeviceResult<DeviceConfig>,
) -> OrchestrationResult<(Box<dyn DeviceOutputPort>, usize)> {
    let config = config?;
    let mut port = factory.create(&config)?;
    port.init(&config)?;
    if let Err(err) = port.open() {
        port.close();
        return Err(err.into());
    }
    Ok((port, config.hardware_led_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lux_device::{DefaultPortFactory, DeviceError};

    fn launcher() -> (InstanceLauncher, tokio::sync::mpsc::UnboundedReceiver<InstanceEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (InstanceLauncher::new(Arc::new(DefaultPortFactory::new()), tx), rx)
    }

    fn virtual_settings() -> InstanceSettings {
        let mut settings = InstanceSettings::new();
        settings.insert(SettingsType::Device, serde_json::json!({ "type": "virtual" }));
        settings
    }

    #[tokio::test]
    async fn test_launch_virtual_instance() {
        let (launcher, mut events) = launcher();
        let handle = launcher.launch(3, "Desk", &virtual_settings()).unwrap();

        let mut instance = handle.wait().await.unwrap();
        assert_eq!(instance.id(), 3);
        assert_eq!(instance.name(), "Desk");

        assert!(instance.request_stop());
        match events.recv().await {
            Some(InstanceEvent::Stopped { id, .. }) => assert_eq!(id, 3),
            other => panic!("unexpected event {:?}", other),
        }
        instance.join();
    }

    #[test]
    fn test_stop_before_construction_closes_port() {
        let (launcher, mut events) = launcher();
        let handle = launcher.launch(4, "Desk", &virtual_settings()).unwrap();

        handle.stop.send(InstanceCommand::Stop).unwrap();
        handle.worker.join().unwrap();

        match events.try_recv() {
            Ok(InstanceEvent::Stopped { id, .. }) => assert_eq!(id, 4),
            other => panic!("unexpected event {:?}", other),
        }
        // o Instance entregue chega com o worker já encerrado
        let mut instance = handle.ready.blocking_recv().unwrap().unwrap();
        assert!(!instance.request_stop());
    }

    #[tokio::test]
    async fn test_launch_unknown_device_type() {
        let (launcher, _events) = launcher();
        let mut settings = InstanceSettings::new();
        settings.insert(SettingsType::Device, serde_json::json!({ "type": "plasma" }));

        let result = launcher.launch(1, "Desk", &settings).unwrap().wait().await;
        assert!(matches!(
            result,
            Err(OrchestrationError::Device(DeviceError::Unsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_launch_invalid_rate() {
        let (launcher, _events) = launcher();
        let mut settings = InstanceSettings::new();
        settings.insert(SettingsType::Device, serde_json::json!({ "type": "virtual", "rate": 0 }));

        let result = launcher.launch(1, "Desk", &settings).unwrap().wait().await;
        assert!(matches!(
            result,
            Err(OrchestrationError::Device(DeviceError::InvalidConfig(_)))
        ));
    }
}
