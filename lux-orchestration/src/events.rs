//! Notificações do orquestrador
//!
//! O `EventBus` entrega cada evento, na ordem de emissão, primeiro aos
//! handlers registrados (na ordem de registro) e depois às assinaturas por
//! canal. A ordem é determinística.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use lux_core::{Component, InstanceId, InstanceState, SettingsType};
use serde::Serialize;

use crate::error::OrchestrationResult;

/// Identificador opaco de quem pediu um start (ex.: uma sessão da API)
pub type CallerId = u64;

/// Notificação emitida pelo orquestrador
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Instância mudou de estado (apenas Running e Stopped são publicados)
    InstanceStateChanged {
        state: InstanceState,
        id: InstanceId,
        name: String,
    },
    /// Conjunto de instâncias mudou
    InstancesListChanged,
    /// Resposta a um start pendente
    StartInstanceResponse { caller: CallerId, tan: i32 },
    /// Configuração persistida alterada
    SettingsChanged {
        settings_type: SettingsType,
        payload: serde_json::Value,
    },
    /// Componente ligado/desligado em todas as instâncias
    ComponentStateChange { component: Component, enable: bool },
    /// Pausa de uma instância alterada
    InstancePauseChanged { id: InstanceId, enabled: bool },
}

/// Filtro de eventos
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Todos os eventos
    All,
    /// Mudanças de estado
    StateChange,
    /// Mudanças na lista de instâncias
    ListChange,
    /// Respostas de start para um chamador
    Caller(CallerId),
    /// Eventos de uma instância específica
    Instance(InstanceId),
    /// Mudanças de configuração
    Settings,
}

impl EventFilter {
    /// Verifica se um evento passa pelo filtro
    pub fn matches(&self, event: &OrchestratorEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _) => true,
            (EventFilter::StateChange, OrchestratorEvent::InstanceStateChanged { .. }) => true,
            (EventFilter::ListChange, OrchestratorEvent::InstancesListChanged) => true,
            (EventFilter::Caller(wanted), OrchestratorEvent::StartInstanceResponse { caller, .. }) => {
                wanted == caller
            }
            (EventFilter::Instance(wanted), OrchestratorEvent::InstanceStateChanged { id, .. })
            | (EventFilter::Instance(wanted), OrchestratorEvent::InstancePauseChanged { id, .. }) => {
                wanted == id
            }
            (EventFilter::Settings, OrchestratorEvent::SettingsChanged { .. }) => true,
            _ => false,
        }
    }
}

/// Handler de eventos (callback)
pub type EventHandler = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

struct FilteredSender {
    filter: EventFilter,
    sender: Sender<OrchestratorEvent>,
}

/// Assinatura por canal
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<OrchestratorEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Próximo evento sem bloquear
    pub fn try_recv(&self) -> Option<OrchestratorEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Todos os eventos pendentes
    pub fn drain(&self) -> Vec<OrchestratorEvent> {
        self.receiver.try_iter().collect()
    }

    /// Receiver subjacente
    pub fn receiver(&self) -> &Receiver<OrchestratorEvent> {
        &self.receiver
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

/// Bus de eventos
#[derive(Clone)]
pub struct EventBus {
    /// Handlers em ordem de registro
    handlers: Arc<Mutex<Vec<(EventFilter, EventHandler)>>>,
    /// Assinaturas por canal
    senders: Arc<Mutex<Vec<FilteredSender>>>,
    /// Histórico limitado
    history: Arc<Mutex<Vec<OrchestratorEvent>>>,
    max_history: usize,
}

impl EventBus {
    /// Cria novo bus de eventos
    pub fn new() -> Self {
        Self::with_history(100)
    }

    /// Cria com tamanho de histórico customizado
    pub fn with_history(max_history: usize) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            senders: Arc::new(Mutex::new(Vec::new())),
            history: Arc::new(Mutex::new(Vec::new())),
            max_history,
        }
    }

    /// Registra handler para um filtro
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> OrchestrationResult<()>
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        self.handlers.lock()?.push((filter, Arc::new(handler)));
        Ok(())
    }

    /// Assina os eventos que passam pelo filtro
    pub fn subscribe(&self, filter: EventFilter) -> OrchestrationResult<Subscription> {
        let (sender, receiver) = unbounded();
        self.senders.lock()?.push(FilteredSender {
            filter: filter.clone(),
            sender,
        });
        Ok(Subscription { receiver, filter })
    }

    /// Emite um evento
    pub fn emit(&self, event: OrchestratorEvent) -> OrchestrationResult<()> {
        {
            let mut history = self.history.lock()?;
            history.push(event.clone());
            if history.len() > self.max_history {
                history.remove(0);
            }
        }

        // Clona a lista para que um handler possa registrar outro sem deadlock
        let handlers: Vec<(EventFilter, EventHandler)> = self.handlers.lock()?.clone();
        for (filter, handler) in &handlers {
            if filter.matches(&event) {
                handler(&event);
            }
        }

        let mut senders = self.senders.lock()?;
        senders.retain(|fs| {
            if !fs.filter.matches(&event) {
                return true;
            }
            // Assinatura descartada: remove o sender
            fs.sender.send(event.clone()).is_ok()
        });

        Ok(())
    }

    /// Histórico de eventos
    pub fn history(&self) -> OrchestrationResult<Vec<OrchestratorEvent>> {
        Ok(self.history.lock()?.clone())
    }

    /// Limpa histórico
    pub fn clear_history(&self) -> OrchestrationResult<()> {
        self.history.lock()?.clear();
        Ok(())
    }

    /// Handlers + assinaturas ativas
    pub fn subscriber_count(&self) -> OrchestrationResult<usize> {
        Ok(self.handlers.lock()?.len() + self.senders.lock()?.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_history", &self.max_history)
            .field("history_len", &self.history.lock().map(|h| h.len()).unwrap_or(0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn running(id: InstanceId) -> OrchestratorEvent {
        OrchestratorEvent::InstanceStateChanged {
            state: InstanceState::Running,
            id,
            name: format!("inst-{}", id),
        }
    }

    #[test]
    fn test_handler_receives_matching_events() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.on(EventFilter::StateChange, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.emit(running(1)).unwrap();
        bus.emit(OrchestratorEvent::InstancesListChanged).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on(EventFilter::All, move |_| order.lock().unwrap().push(tag)).unwrap();
        }

        bus.emit(OrchestratorEvent::InstancesListChanged).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_subscription_preserves_order() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::All).unwrap();

        bus.emit(running(1)).unwrap();
        bus.emit(running(2)).unwrap();
        bus.emit(OrchestratorEvent::InstancesListChanged).unwrap();

        let events = sub.drain();
        assert_eq!(events, vec![running(1), running(2), OrchestratorEvent::InstancesListChanged]);
    }

    #[test]
    fn test_caller_filter() {
        let filter = EventFilter::Caller(7);
        assert!(filter.matches(&OrchestratorEvent::StartInstanceResponse { caller: 7, tan: 1 }));
        assert!(!filter.matches(&OrchestratorEvent::StartInstanceResponse { caller: 8, tan: 1 }));
        assert!(!filter.matches(&running(7)));
    }

    #[test]
    fn test_instance_filter() {
        let filter = EventFilter::Instance(2);
        assert!(filter.matches(&running(2)));
        assert!(filter.matches(&OrchestratorEvent::InstancePauseChanged { id: 2, enabled: false }));
        assert!(!filter.matches(&running(3)));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::All).unwrap();
        assert_eq!(bus.subscriber_count().unwrap(), 1);

        drop(sub);
        bus.emit(OrchestratorEvent::InstancesListChanged).unwrap();
        assert_eq!(bus.subscriber_count().unwrap(), 0);
    }

    #[test]
    fn test_history_limit() {
        let bus = EventBus::with_history(2);
        for id in 0..5 {
            bus.emit(running(id)).unwrap();
        }
        let history = bus.history().unwrap();
        assert_eq!(history, vec![running(3), running(4)]);

        bus.clear_history().unwrap();
        assert!(bus.history().unwrap().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(OrchestratorEvent::StartInstanceResponse { caller: 3, tan: 42 }).unwrap();
        assert_eq!(json["event"], "start_instance_response");
        assert_eq!(json["tan"], 42);

        let json = serde_json::to_value(running(1)).unwrap();
        assert_eq!(json["state"], "running");
    }
}
