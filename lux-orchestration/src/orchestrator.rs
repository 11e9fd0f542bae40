//! Orquestrador de instâncias
//!
//! Máquina de estados de dono único: todos os métodos recebem `&mut self`
//! e são chamados pelo mesmo loop de controle, que também entrega os
//! [`InstanceEvent`]s recebidos do canal devolvido por
//! [`InstanceOrchestrator::new`].
//!
//! ```text
//!            start_instance                Constructed(Ok)
//!  Stopped ─────────────────▶ Starting ─────────────────────▶ Running
//!     ▲                          │ Constructed(Err)             │ stop_instance
//!     │                          ▼                              ▼ hibernate
//!     └──────────────────── (Stopped) ◀──── Stopped/Faulted ── Stopping
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use lux_core::{Component, InstanceId, InstanceState, SYSTEM_INSTANCE, SettingsType};
use lux_device::{PortFactory, RGB8};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, info, warn};

use crate::backup::BackupDocument;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::events::{CallerId, EventBus, OrchestratorEvent};
use crate::instance::{Instance, InstanceCommand, InstanceEvent};
use crate::launcher::{InstanceLauncher, LaunchHandle};
use crate::power::PowerEvent;
use crate::registry::InstanceRegistry;

/// Configuração do orquestrador
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Tamanho do histórico de eventos
    pub event_history_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_history_size: 256,
        }
    }
}

/// Start aguardando a instância ficar pronta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStartRequest {
    pub caller: CallerId,
    pub tan: i32,
    pub instance: InstanceId,
}

/// Linha de `get_instance_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceData {
    pub instance: InstanceId,
    pub friendly_name: String,
    pub enabled: bool,
    pub running: bool,
    pub state: InstanceState,
}

/// Construção em andamento de um id em Starting
struct PendingLaunch {
    worker: JoinHandle<()>,
    stop: Sender<InstanceCommand>,
}

/// Orquestrador central de instâncias
pub struct InstanceOrchestrator {
    registry: Box<dyn InstanceRegistry>,
    launcher: InstanceLauncher,
    events_tx: UnboundedSender<InstanceEvent>,
    bus: EventBus,
    /// Estado explícito de cada id ativo; ausente = Stopped
    states: BTreeMap<InstanceId, InstanceState>,
    /// Arena: instâncias construídas (Running ou Stopping)
    instances: BTreeMap<InstanceId, Instance>,
    /// Threads ainda construindo (ids em Starting)
    launching: BTreeMap<InstanceId, PendingLaunch>,
    /// Starts pendentes; só existem para ids em Starting
    pending: BTreeMap<InstanceId, Vec<PendingStartRequest>>,
    /// Conjunto ativo no último hibernate(false)
    hibernated: Option<BTreeSet<InstanceId>>,
    /// Starts pedidos enquanto o id ainda estava em Stopping
    deferred: BTreeMap<InstanceId, Vec<PendingStartRequest>>,
    sweep_started: bool,
    sweep_pending: BTreeSet<InstanceId>,
    faults: BTreeMap<InstanceId, String>,
}

impl std::fmt::Debug for InstanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOrchestrator")
            .field("states", &self.states)
            .field("pending", &self.pending)
            .field("hibernated", &self.hibernated)
            .finish()
    }
}

impl InstanceOrchestrator {
    /// Cria o orquestrador e o canal de eventos de instância
    pub fn new(
        registry: Box<dyn InstanceRegistry>,
        factory: Arc<dyn PortFactory>,
    ) -> (Self, UnboundedReceiver<InstanceEvent>) {
        Self::with_config(OrchestratorConfig::default(), registry, factory)
    }

    /// Cria com configuração específica
    pub fn with_config(
        config: OrchestratorConfig,
        registry: Box<dyn InstanceRegistry>,
        factory: Arc<dyn PortFactory>,
    ) -> (Self, UnboundedReceiver<InstanceEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let orchestrator = Self {
            registry,
            launcher: InstanceLauncher::new(factory, events_tx.clone()),
            events_tx,
            bus: EventBus::with_history(config.event_history_size),
            states: BTreeMap::new(),
            instances: BTreeMap::new(),
            launching: BTreeMap::new(),
            pending: BTreeMap::new(),
            hibernated: None,
            deferred: BTreeMap::new(),
            sweep_started: false,
            sweep_pending: BTreeSet::new(),
            faults: BTreeMap::new(),
        };
        (orchestrator, events_rx)
    }

    fn notify(&self, event: OrchestratorEvent) {
        if let Err(err) = self.bus.emit(event) {
            warn!(error = %err, "Event delivery failed");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CONSULTAS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &dyn InstanceRegistry {
        self.registry.as_ref()
    }

    pub fn instance_state(&self, id: InstanceId) -> InstanceState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    pub fn is_instance_running(&self, id: InstanceId) -> bool {
        self.instance_state(id) == InstanceState::Running
    }

    fn ids_in(&self, state: InstanceState) -> Vec<InstanceId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids em Running, em ordem
    pub fn running_ids(&self) -> Vec<InstanceId> {
        self.ids_in(InstanceState::Running)
    }

    /// Ids em Starting, em ordem
    pub fn starting_ids(&self) -> Vec<InstanceId> {
        self.ids_in(InstanceState::Starting)
    }

    /// Starts aguardando o id
    pub fn pending_requests(&self, id: InstanceId) -> &[PendingStartRequest] {
        self.pending.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Handle de uma instância em Running
    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        if !self.is_instance_running(id) {
            return None;
        }
        self.instances.get(&id)
    }

    /// Última falha de hardware ou de construção do id
    pub fn last_fault(&self, id: InstanceId) -> Option<&str> {
        self.faults.get(&id).map(String::as_str)
    }

    /// Média de cor do último frame; vazio fora de Running
    pub fn get_average_color(&self, id: InstanceId) -> Option<RGB8> {
        self.instance(id).and_then(Instance::average_color)
    }

    /// Registro anotado com o estado atual
    pub fn get_instance_data(&self) -> Vec<InstanceData> {
        self.registry
            .list()
            .into_iter()
            .map(|entry| {
                let state = self.instance_state(entry.id);
                InstanceData {
                    instance: entry.id,
                    friendly_name: entry.name,
                    enabled: entry.enabled,
                    running: state == InstanceState::Running,
                    state,
                }
            })
            .collect()
    }

    /// Varredura inicial concluída
    pub fn are_instances_ready(&self) -> bool {
        self.sweep_started && self.sweep_pending.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CICLO DE VIDA
    // ═══════════════════════════════════════════════════════════════════════

    /// Pede o start de `id`; a prontidão chega depois como evento
    ///
    /// Com `caller`, um `StartInstanceResponse` é emitido quando o id chegar
    /// a Running. Falhas de construção não geram resposta.
    pub fn start_instance(&mut self, id: InstanceId, caller: Option<CallerId>, tan: i32) -> bool {
        let started = self.start(id, caller, tan);
        if started {
            if let Err(err) = self.registry.set_enabled(id, true) {
                warn!(instance = id, error = %err, "Cannot persist enabled flag");
            }
        }
        started
    }

    fn start(&mut self, id: InstanceId, caller: Option<CallerId>, tan: i32) -> bool {
        let Some(entry) = self.registry.get(id) else {
            warn!(instance = id, "Cannot start unknown instance");
            return false;
        };

        match self.instance_state(id) {
            InstanceState::Running => {
                debug!(instance = id, "Instance already running");
                return true;
            }
            InstanceState::Starting => {
                self.queue_request(id, caller, tan);
                return true;
            }
            InstanceState::Stopping => {
                debug!(instance = id, "Instance still stopping; start deferred");
                let deferred = self.deferred.entry(id).or_default();
                if let Some(caller) = caller {
                    deferred.push(PendingStartRequest {
                        caller,
                        tan,
                        instance: id,
                    });
                }
                return true;
            }
            InstanceState::Stopped => {}
        }

        if !self.launch(id, &entry.name) {
            return false;
        }
        self.queue_request(id, caller, tan);
        true
    }

    fn queue_request(&mut self, id: InstanceId, caller: Option<CallerId>, tan: i32) {
        if let Some(caller) = caller {
            self.pending.entry(id).or_default().push(PendingStartRequest {
                caller,
                tan,
                instance: id,
            });
        }
    }

    fn launch(&mut self, id: InstanceId, name: &str) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(instance = id, "Instance start requires a tokio runtime");
            return false;
        };

        let settings = self.registry.settings(id).unwrap_or_default();
        let handle = match self.launcher.launch(id, name, &settings) {
            Ok(handle) => handle,
            Err(err) => {
                error!(instance = id, error = %err, "Cannot launch instance");
                self.faults.insert(id, err.to_string());
                return false;
            }
        };

        info!(instance = id, name, "Starting instance");
        self.states.insert(id, InstanceState::Starting);
        self.faults.remove(&id);

        let LaunchHandle { ready, worker, stop, .. } = handle;
        self.launching.insert(id, PendingLaunch { worker, stop });

        let events = self.events_tx.clone();
        runtime.spawn(async move {
            let result = ready
                .await
                .map_err(|_| OrchestrationError::WorkerLost(id))
                .and_then(|result| result);
            let _ = events.send(InstanceEvent::Constructed { id, result });
        });
        true
    }

    /// Entrega um evento de instância (chamado pelo loop de controle)
    pub fn handle_instance_event(&mut self, event: InstanceEvent) {
        match event {
            InstanceEvent::Constructed { result: Ok(instance), .. } => {
                self.handle_instance_just_started(instance);
            }
            InstanceEvent::Constructed { id, result: Err(err) } => {
                self.handle_launch_failure(id, err);
            }
            InstanceEvent::Stopped { id, .. } | InstanceEvent::Faulted { id, .. }
                if !matches!(self.instance_state(id), InstanceState::Running | InstanceState::Stopping) =>
            {
                // worker de uma geração anterior (ex.: após stop_all_on_exit)
                debug!(instance = id, "Ignoring stale worker event");
            }
            InstanceEvent::Stopped { id, name } => {
                self.handle_instance_state_change(InstanceState::Stopped, id, &name);
            }
            InstanceEvent::Faulted { id, name, message } => {
                warn!(instance = id, error = %message, "Instance stopped by hardware fault");
                self.faults.insert(id, message);
                self.handle_instance_state_change(InstanceState::Stopped, id, &name);
            }
        }
    }

    /// Instância construída: Starting -> Running
    pub fn handle_instance_just_started(&mut self, mut instance: Instance) {
        let id = instance.id();
        if self.instance_state(id) != InstanceState::Starting {
            debug!(instance = id, "Discarding instance that is no longer starting");
            instance.request_stop();
            return;
        }
        if let Some(launch) = self.launching.remove(&id) {
            instance.attach_worker(launch.worker);
        }

        if !self.registry.contains(id) {
            // Removida por restauração de backup durante a construção
            instance.request_stop();
            self.states.insert(id, InstanceState::Stopping);
            self.instances.insert(id, instance);
            self.pending.remove(&id);
            self.sweep_pending.remove(&id);
            return;
        }

        let name = instance.name().to_string();
        self.states.insert(id, InstanceState::Running);
        self.instances.insert(id, instance);
        self.sweep_pending.remove(&id);
        info!(instance = id, name = %name, "Instance running");

        self.handle_instance_state_change(InstanceState::Running, id, &name);
    }

    /// Publica a mudança de estado reportada por uma instância
    ///
    /// `Running` resolve os starts pendentes. `Stopped` remove o id de
    /// Starting/Running/Stopping e libera o `Instance`.
    pub fn handle_instance_state_change(&mut self, state: InstanceState, id: InstanceId, name: &str) {
        match state {
            InstanceState::Running => {
                if !self.is_instance_running(id) {
                    warn!(instance = id, "Running reported for an instance that is not running");
                    return;
                }
                self.notify(OrchestratorEvent::InstanceStateChanged {
                    state: InstanceState::Running,
                    id,
                    name: name.to_string(),
                });
                for request in self.pending.remove(&id).unwrap_or_default() {
                    self.notify(OrchestratorEvent::StartInstanceResponse {
                        caller: request.caller,
                        tan: request.tan,
                    });
                }
            }
            InstanceState::Stopped => self.finish_stop(id, name),
            InstanceState::Starting | InstanceState::Stopping => {
                debug!(instance = id, %state, "Transient state reports are ignored");
            }
        }
    }

    fn finish_stop(&mut self, id: InstanceId, name: &str) {
        if self.states.remove(&id).is_none() {
            debug!(instance = id, "Stop reported for an inactive instance");
            return;
        }
        if let Some(mut instance) = self.instances.remove(&id) {
            instance.join();
        }
        self.pending.remove(&id);
        self.sweep_pending.remove(&id);
        info!(instance = id, name, "Instance stopped");

        self.notify(OrchestratorEvent::InstanceStateChanged {
            state: InstanceState::Stopped,
            id,
            name: name.to_string(),
        });
        self.notify(OrchestratorEvent::InstancesListChanged);

        if let Some(requests) = self.deferred.remove(&id) {
            if self.start(id, None, 0) {
                for request in requests {
                    self.queue_request(id, Some(request.caller), request.tan);
                }
            }
        }
    }

    fn handle_launch_failure(&mut self, id: InstanceId, err: OrchestrationError) {
        if self.instance_state(id) != InstanceState::Starting {
            debug!(instance = id, error = %err, "Ignoring failure of a cancelled launch");
            return;
        }
        // a thread já retornou depois de entregar a falha
        self.launching.remove(&id);
        error!(instance = id, error = %err, "Instance failed to start");
        let message = match &err {
            OrchestrationError::Device(device) => device.to_string(),
            other => other.to_string(),
        };
        self.faults.insert(id, message);

        let name = self.registry.get(id).map(|e| e.name).unwrap_or_default();
        self.finish_stop(id, &name);
    }

    /// Pede o stop de um id em Running
    pub fn stop_instance(&mut self, id: InstanceId) -> bool {
        match self.try_stop_instance(id) {
            Ok(()) => true,
            Err(err @ OrchestrationError::ReservedInstance(_)) => {
                warn!(instance = id, error = %err, "Stop refused");
                false
            }
            Err(err) => {
                debug!(instance = id, error = %err, "Stop refused");
                false
            }
        }
    }

    /// Como [`stop_instance`](Self::stop_instance), com o motivo da recusa
    pub fn try_stop_instance(&mut self, id: InstanceId) -> OrchestrationResult<()> {
        if id == SYSTEM_INSTANCE {
            return Err(OrchestrationError::ReservedInstance(id));
        }
        if !self.registry.contains(id) {
            return Err(OrchestrationError::UnknownInstance(id));
        }
        if !self.request_stop(id) {
            return Err(OrchestrationError::NotRunning(id));
        }
        if let Err(err) = self.registry.set_enabled(id, false) {
            warn!(instance = id, error = %err, "Cannot persist enabled flag");
        }
        Ok(())
    }

    fn request_stop(&mut self, id: InstanceId) -> bool {
        if !self.is_instance_running(id) {
            return false;
        }
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        instance.request_stop();
        self.states.insert(id, InstanceState::Stopping);
        info!(instance = id, "Stopping instance");
        true
    }

    /// Cria entrada no registro e, opcionalmente, inicia
    pub fn create_instance(&mut self, name: &str, start: bool) -> OrchestrationResult<InstanceId> {
        let id = self.registry.create(name)?;
        info!(instance = id, name, "Instance created");
        self.notify(OrchestratorEvent::InstancesListChanged);

        if start {
            self.start_instance(id, None, 0);
        }
        Ok(id)
    }

    /// Remove entrada do registro; o id precisa estar parado
    pub fn delete_instance(&mut self, id: InstanceId) -> OrchestrationResult<()> {
        if id == SYSTEM_INSTANCE {
            return Err(OrchestrationError::ReservedInstance(id));
        }
        if !self.registry.contains(id) {
            return Err(OrchestrationError::UnknownInstance(id));
        }
        if self.instance_state(id).is_active() {
            return Err(OrchestrationError::StillActive(id));
        }

        self.registry.remove(id)?;
        self.faults.remove(&id);
        info!(instance = id, "Instance deleted");
        self.notify(OrchestratorEvent::InstancesListChanged);
        Ok(())
    }

    /// Renomeia uma instância
    pub fn save_name(&mut self, id: InstanceId, name: &str) -> OrchestrationResult<()> {
        if !self.registry.contains(id) {
            return Err(OrchestrationError::UnknownInstance(id));
        }
        self.registry.rename(id, name)?;

        if let (Some(entry), Some(instance)) = (self.registry.get(id), self.instances.get_mut(&id)) {
            instance.set_name(&entry.name);
        }
        self.notify(OrchestratorEvent::InstancesListChanged);
        Ok(())
    }

    /// Persiste e repassa a calibração a todas as instâncias em Running
    pub fn save_calibration(&mut self, data: serde_json::Value) -> OrchestrationResult<()> {
        for id in self.running_ids() {
            self.registry
                .save_setting(id, SettingsType::Calibration, data.clone())?;
            if let Some(instance) = self.instances.get(&id) {
                if let Err(err) = instance.send_calibration(data.clone()) {
                    warn!(instance = id, error = %err, "Calibration not delivered");
                }
            }
        }

        self.notify(OrchestratorEvent::SettingsChanged {
            settings_type: SettingsType::Calibration,
            payload: data,
        });
        Ok(())
    }

    /// Pausa ou retoma todas as instâncias em Running
    ///
    /// Ids em Starting não são afetados.
    pub fn toggle_state_all_instances(&mut self, pause: bool) {
        let mut toggled = Vec::new();
        for id in self.running_ids() {
            if let Some(instance) = self.instances.get(&id) {
                match instance.set_paused(pause) {
                    Ok(()) => toggled.push(id),
                    Err(err) => warn!(instance = id, error = %err, "Pause not delivered"),
                }
            }
        }

        for id in toggled {
            self.notify(OrchestratorEvent::InstancePauseChanged { id, enabled: !pause });
        }
    }

    /// Liga/desliga um componente em todas as instâncias em Running
    pub fn set_component_state_all_instances(&mut self, component: Component, enable: bool) {
        for id in self.running_ids() {
            if let Some(instance) = self.instances.get(&id) {
                if let Err(err) = instance.set_component(component, enable) {
                    warn!(instance = id, error = %err, "Component toggle not delivered");
                }
            }
        }
        self.notify(OrchestratorEvent::ComponentStateChange { component, enable });
    }

    /// Suspensão (`wake_up = false`) e retomada (`wake_up = true`) do host
    pub fn hibernate(&mut self, wake_up: bool) {
        if !wake_up {
            // um segundo suspend soma o que voltou a rodar ao conjunto gravado
            let active = self.running_ids();
            info!(count = active.len(), "Hibernating instances");
            for id in &active {
                self.request_stop(*id);
            }
            self.hibernated.get_or_insert_with(BTreeSet::new).extend(active);
        } else {
            let Some(previous) = self.hibernated.take() else {
                debug!("Resume without hibernate");
                return;
            };
            info!(count = previous.len(), "Resuming instances");
            for id in previous {
                if self.registry.contains(id) {
                    self.start(id, None, 0);
                }
            }
        }
    }

    /// Entrega um evento da ponte de energia
    pub fn handle_power_event(&mut self, event: PowerEvent) {
        self.hibernate(event.is_resume());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKUP
    // ═══════════════════════════════════════════════════════════════════════

    /// Exporta registro e configurações
    pub fn get_backup(&self) -> BackupDocument {
        BackupDocument::from_registry(self.registry.as_ref())
    }

    /// Valida o documento inteiro e só então reescreve o registro
    ///
    /// Nenhuma instância é reiniciada. Ids ativos que não existem no
    /// documento recebem stop.
    pub fn restore_backup(&mut self, document: &serde_json::Value) -> OrchestrationResult<()> {
        let document = BackupDocument::from_json(document)?;
        let kept = document.ids();

        self.registry.replace_all(document.instances)?;
        info!(count = kept.len(), "Backup restored");

        let orphaned: Vec<InstanceId> = self
            .states
            .keys()
            .copied()
            .filter(|id| !kept.contains(id))
            .collect();
        for id in orphaned {
            self.deferred.remove(&id);
            self.request_stop(id);
        }
        self.faults.retain(|id, _| kept.contains(id));

        self.notify(OrchestratorEvent::InstancesListChanged);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INICIALIZAÇÃO / ENCERRAMENTO
    // ═══════════════════════════════════════════════════════════════════════

    /// Varredura inicial: instância de sistema + entradas habilitadas
    pub fn start_all(&mut self) {
        self.sweep_started = true;
        let ids: Vec<InstanceId> = self
            .registry
            .list()
            .into_iter()
            .filter(|e| e.id == SYSTEM_INSTANCE || e.enabled)
            .map(|e| e.id)
            .collect();

        info!(count = ids.len(), "Starting enabled instances");
        for id in ids {
            if self.start(id, None, 0) && self.instance_state(id) == InstanceState::Starting {
                self.sweep_pending.insert(id);
            }
        }
    }

    /// Para todas as instâncias ativas e aguarda seus workers
    ///
    /// Bloqueia até cada porta ter recebido o frame preto e sido fechada.
    /// Ids em Starting recebem o Stop antes mesmo de a construção terminar;
    /// o `Constructed` que chegar depois é descartado.
    pub fn stop_all_on_exit(&mut self) {
        let launching = std::mem::take(&mut self.launching);
        info!(
            count = self.instances.len() + launching.len(),
            "Stopping all instances"
        );
        for instance in self.instances.values_mut() {
            instance.request_stop();
        }
        for launch in launching.values() {
            let _ = launch.stop.send(InstanceCommand::Stop);
        }

        let instances = std::mem::take(&mut self.instances);
        for (id, mut instance) in instances {
            instance.join();
            self.states.remove(&id);
            self.notify(OrchestratorEvent::InstanceStateChanged {
                state: InstanceState::Stopped,
                id,
                name: instance.name().to_string(),
            });
        }

        for (id, launch) in launching {
            if launch.worker.join().is_err() {
                error!(instance = id, "Instance worker panicked");
            }
            if self.states.remove(&id).is_none() {
                continue;
            }
            let name = self.registry.get(id).map(|e| e.name).unwrap_or_default();
            self.notify(OrchestratorEvent::InstanceStateChanged {
                state: InstanceState::Stopped,
                id,
                name,
            });
        }

        self.sweep_pending.clear();
        self.pending.clear();
        self.deferred.clear();
        self.hibernated = None;
    }
}
