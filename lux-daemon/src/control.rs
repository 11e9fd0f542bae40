//! Loop de controle: dono único do orquestrador
//!
//! Todas as entradas (comandos de gerenciamento, eventos de instância,
//! eventos de energia) são serializadas por um único `select!`, então o
//! orquestrador nunca é acessado concorrentemente.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use lux_orchestration::{
    CallerId, Component, EventFilter, InstanceData, InstanceEvent, InstanceId,
    InstanceOrchestrator, OrchestrationResult, OrchestratorEvent, PowerEvent, Subscription,
};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::state;

type Reply<T> = oneshot::Sender<T>;

/// Pedido de gerenciamento entregue ao loop
#[derive(Debug)]
pub enum ControlCommand {
    Start {
        id: InstanceId,
        caller: Option<CallerId>,
        tan: i32,
        reply: Reply<bool>,
    },
    Stop {
        id: InstanceId,
        reply: Reply<bool>,
    },
    Create {
        name: String,
        start: bool,
        reply: Reply<OrchestrationResult<InstanceId>>,
    },
    Delete {
        id: InstanceId,
        reply: Reply<OrchestrationResult<()>>,
    },
    Rename {
        id: InstanceId,
        name: String,
        reply: Reply<OrchestrationResult<()>>,
    },
    InstanceData {
        reply: Reply<Vec<InstanceData>>,
    },
    Ready {
        reply: Reply<bool>,
    },
    Backup {
        reply: Reply<Value>,
    },
    Restore {
        document: Value,
        reply: Reply<OrchestrationResult<()>>,
    },
    PauseAll {
        pause: bool,
    },
    SetComponentAll {
        component: Component,
        enable: bool,
    },
    SaveCalibration {
        data: Value,
        reply: Reply<OrchestrationResult<()>>,
    },
    Subscribe {
        filter: EventFilter,
        reply: Reply<OrchestrationResult<Subscription>>,
    },
    /// Diagnóstico: últimos eventos publicados
    EventHistory {
        reply: Reply<OrchestrationResult<Vec<OrchestratorEvent>>>,
    },
}

/// Lado cliente do loop de controle
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: UnboundedSender<ControlCommand>,
}

impl ControlHandle {
    fn send(&self, command: ControlCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("control loop is gone"))
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> ControlCommand) -> anyhow::Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.context("control loop dropped the request")
    }

    pub async fn start_instance(&self, id: InstanceId, caller: Option<CallerId>, tan: i32) -> anyhow::Result<bool> {
        self.request(|reply| ControlCommand::Start { id, caller, tan, reply })
            .await
    }

    pub async fn stop_instance(&self, id: InstanceId) -> anyhow::Result<bool> {
        self.request(|reply| ControlCommand::Stop { id, reply }).await
    }

    pub async fn create_instance(&self, name: &str, start: bool) -> anyhow::Result<InstanceId> {
        let name = name.to_string();
        Ok(self
            .request(|reply| ControlCommand::Create { name, start, reply })
            .await??)
    }

    pub async fn delete_instance(&self, id: InstanceId) -> anyhow::Result<()> {
        Ok(self.request(|reply| ControlCommand::Delete { id, reply }).await??)
    }

    pub async fn save_name(&self, id: InstanceId, name: &str) -> anyhow::Result<()> {
        let name = name.to_string();
        Ok(self
            .request(|reply| ControlCommand::Rename { id, name, reply })
            .await??)
    }

    pub async fn instance_data(&self) -> anyhow::Result<Vec<InstanceData>> {
        self.request(|reply| ControlCommand::InstanceData { reply }).await
    }

    pub async fn are_instances_ready(&self) -> anyhow::Result<bool> {
        self.request(|reply| ControlCommand::Ready { reply }).await
    }

    pub async fn backup(&self) -> anyhow::Result<Value> {
        self.request(|reply| ControlCommand::Backup { reply }).await
    }

    pub async fn restore_backup(&self, document: Value) -> anyhow::Result<()> {
        Ok(self
            .request(|reply| ControlCommand::Restore { document, reply })
            .await??)
    }

    pub fn pause_all(&self, pause: bool) -> anyhow::Result<()> {
        self.send(ControlCommand::PauseAll { pause })
    }

    pub fn set_component_all(&self, component: Component, enable: bool) -> anyhow::Result<()> {
        self.send(ControlCommand::SetComponentAll { component, enable })
    }

    pub async fn save_calibration(&self, data: Value) -> anyhow::Result<()> {
        Ok(self
            .request(|reply| ControlCommand::SaveCalibration { data, reply })
            .await??)
    }

    pub async fn subscribe(&self, filter: EventFilter) -> anyhow::Result<Subscription> {
        Ok(self
            .request(|reply| ControlCommand::Subscribe { filter, reply })
            .await??)
    }

    /// Eventos mais recentes, limitados por `[daemon] event_history`
    pub async fn event_history(&self) -> anyhow::Result<Vec<OrchestratorEvent>> {
        Ok(self
            .request(|reply| ControlCommand::EventHistory { reply })
            .await??)
    }
}

/// Loop de controle
pub struct ControlLoop {
    orchestrator: InstanceOrchestrator,
    events: UnboundedReceiver<InstanceEvent>,
    power: UnboundedReceiver<PowerEvent>,
    commands: UnboundedReceiver<ControlCommand>,
    state_file: Option<PathBuf>,
}

impl ControlLoop {
    pub fn new(
        orchestrator: InstanceOrchestrator,
        events: UnboundedReceiver<InstanceEvent>,
        power: UnboundedReceiver<PowerEvent>,
        state_file: Option<PathBuf>,
    ) -> (Self, ControlHandle) {
        let (commands_tx, commands) = unbounded_channel();
        let control = Self {
            orchestrator,
            events,
            power,
            commands,
            state_file,
        };
        (control, ControlHandle { commands: commands_tx })
    }

    /// Processa entradas até `shutdown` completar, depois encerra as instâncias
    pub async fn run<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Control loop running");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(event) = self.events.recv() => {
                    self.orchestrator.handle_instance_event(event);
                }
                Some(event) = self.power.recv() => {
                    self.orchestrator.handle_power_event(event);
                }
                Some(command) = self.commands.recv() => {
                    self.apply(command);
                }
            }
        }

        self.shutdown()
    }

    fn apply(&mut self, command: ControlCommand) {
        debug!(?command, "Control command");
        let orch = &mut self.orchestrator;
        // respostas sem destinatário são descartadas
        match command {
            ControlCommand::Start { id, caller, tan, reply } => {
                let _ = reply.send(orch.start_instance(id, caller, tan));
            }
            ControlCommand::Stop { id, reply } => {
                let _ = reply.send(orch.stop_instance(id));
            }
            ControlCommand::Create { name, start, reply } => {
                let _ = reply.send(orch.create_instance(&name, start));
            }
            ControlCommand::Delete { id, reply } => {
                let _ = reply.send(orch.delete_instance(id));
            }
            ControlCommand::Rename { id, name, reply } => {
                let _ = reply.send(orch.save_name(id, &name));
            }
            ControlCommand::InstanceData { reply } => {
                let _ = reply.send(orch.get_instance_data());
            }
            ControlCommand::Ready { reply } => {
                let _ = reply.send(orch.are_instances_ready());
            }
            ControlCommand::Backup { reply } => {
                let _ = reply.send(orch.get_backup().to_json());
            }
            ControlCommand::Restore { document, reply } => {
                let _ = reply.send(orch.restore_backup(&document));
            }
            ControlCommand::PauseAll { pause } => orch.toggle_state_all_instances(pause),
            ControlCommand::SetComponentAll { component, enable } => {
                orch.set_component_state_all_instances(component, enable);
            }
            ControlCommand::SaveCalibration { data, reply } => {
                let _ = reply.send(orch.save_calibration(data));
            }
            ControlCommand::Subscribe { filter, reply } => {
                let _ = reply.send(orch.event_bus().subscribe(filter));
            }
            ControlCommand::EventHistory { reply } => {
                let _ = reply.send(orch.event_bus().history());
            }
        }
    }

    fn shutdown(mut self) -> anyhow::Result<()> {
        let backup = self.orchestrator.get_backup().to_json();

        // bloqueia até cada porta receber o frame preto e fechar
        tokio::task::block_in_place(|| self.orchestrator.stop_all_on_exit());

        if let Some(path) = &self.state_file {
            state::save(path, &backup)?;
        }
        info!("Control loop stopped");
        Ok(())
    }
}
