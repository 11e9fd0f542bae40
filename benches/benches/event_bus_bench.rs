//! # Event Bus Benchmarks
//!
//! Throughput de notificações do orquestrador e operações do registro.
//!
//! Run: `cargo bench --bench event_bus_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use lux_core::InstanceState;
use lux_orchestration::{EventBus, EventFilter, InstanceRegistry, MemoryRegistry, OrchestratorEvent};

fn state_event(id: u8) -> OrchestratorEvent {
    OrchestratorEvent::InstanceStateChanged {
        state: InstanceState::Running,
        id,
        name: "bench".into(),
    }
}

/// Emissão com N assinaturas
fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_bus");

    for subscribers in [0usize, 1, 8] {
        let bus = EventBus::with_history(256);
        let subs: Vec<_> = (0..subscribers)
            .map(|_| bus.subscribe(EventFilter::All).unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::new("emit", subscribers), &subscribers, |b, _| {
            b.iter(|| {
                bus.emit(black_box(state_event(1))).unwrap();
                for sub in &subs {
                    black_box(sub.drain());
                }
            })
        });
    }

    let bus = EventBus::new();
    let sub = bus.subscribe(EventFilter::Instance(3)).unwrap();
    group.bench_function("emit_filtered", |b| {
        b.iter(|| {
            bus.emit(black_box(state_event(1))).unwrap();
            black_box(sub.try_recv())
        })
    });

    group.finish();
}

/// Registro em memória
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let mut registry = MemoryRegistry::new();
    for i in 0..32 {
        registry.create(&format!("Instance {}", i)).unwrap();
    }

    group.bench_function("list_33", |b| b.iter(|| black_box(registry.list())));
    group.bench_function("records_33", |b| b.iter(|| black_box(registry.records())));

    group.bench_function("create_remove", |b| {
        b.iter(|| {
            let id = registry.create("Transient").unwrap();
            registry.remove(black_box(id)).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_emit, bench_registry);
criterion_main!(benches);
