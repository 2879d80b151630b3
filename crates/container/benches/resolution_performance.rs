use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use container::{Constructors, Container, Inject, RegisterOptions, Reuse};

/// Performance benchmarks для resolution engine
/// Измеряет: registration, холодную/горячую резолюцию, scope overhead

/// Simple service для тестирования
struct LightweightService {
    id: u64,
}

impl LightweightService {
    fn new(id: u64) -> Self {
        Self { id }
    }
}

/// Heavy service с работой в конструкторе
struct HeavyService {
    computed_data: Vec<u64>,
}

impl HeavyService {
    fn new() -> Self {
        let computed_data: Vec<u64> = (0..1000).map(|i| (i * 31) % 1000).collect();
        Self { computed_data }
    }
}

/// Зависимый сервис для тестирования инъекции графа
struct DependentService {
    #[allow(dead_code)]
    lightweight: Arc<LightweightService>,
    #[allow(dead_code)]
    heavy: Arc<HeavyService>,
}

fn register_graph(container: &Container) {
    container
        .register::<LightweightService>(
            Constructors::new().ctor0(|| LightweightService::new(1)),
            RegisterOptions::new().reuse(Reuse::Singleton),
        )
        .expect("lightweight");
    container
        .register::<HeavyService>(
            Constructors::new().ctor0(HeavyService::new),
            RegisterOptions::new().reuse(Reuse::Singleton),
        )
        .expect("heavy");
    container
        .register::<DependentService>(
            Constructors::new().ctor2::<Inject<LightweightService>, Inject<HeavyService>, _>(
                |lightweight, heavy| DependentService { lightweight, heavy },
            ),
            RegisterOptions::new().reuse(Reuse::Transient),
        )
        .expect("dependent");
}

/// Benchmark: регистрация множественных сервисов
fn bench_service_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    for service_count in [10u64, 50, 100, 500].iter() {
        group.bench_with_input(
            BenchmarkId::new("keyed_services", service_count),
            service_count,
            |b, &count| {
                b.iter(|| {
                    let container = Container::new();
                    for i in 0..count {
                        container
                            .register::<LightweightService>(
                                Constructors::new().ctor0(move || LightweightService::new(i)),
                                RegisterOptions::new().keyed(i),
                            )
                            .expect("register");
                    }
                    black_box(container)
                });
            },
        );
    }
    group.finish();
}

/// Benchmark: холодная резолюция (построение плана) vs горячая (кэш)
fn bench_resolution_cold_vs_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    group.bench_function("cold_plan_build", |b| {
        b.iter(|| {
            let container = Container::new();
            register_graph(&container);
            black_box(container.resolve::<DependentService>().expect("resolve"))
        });
    });

    group.bench_function("warm_cached_plan", |b| {
        let container = Container::new();
        register_graph(&container);
        // Прогрев: план скомпилирован в замыкания
        for _ in 0..8 {
            container.resolve::<DependentService>().expect("warmup");
        }
        b.iter(|| black_box(container.resolve::<DependentService>().expect("resolve")));
    });

    group.bench_function("singleton_lookup", |b| {
        let container = Container::new();
        register_graph(&container);
        container.resolve::<HeavyService>().expect("warmup");
        b.iter(|| black_box(container.resolve::<HeavyService>().expect("resolve")));
    });

    group.finish();
}

/// Benchmark: накладные расходы scope
fn bench_scope_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("scopes");

    group.bench_function("open_close_scope", |b| {
        let container = Container::new();
        b.iter(|| {
            let scope = container.open_scope().expect("open");
            scope.close().expect("close");
        });
    });

    group.bench_function("scoped_resolution", |b| {
        let container = Container::new();
        container
            .register::<LightweightService>(
                Constructors::new().ctor0(|| LightweightService::new(7)),
                RegisterOptions::new().reuse(Reuse::Scoped),
            )
            .expect("register");
        let scope = container.open_scope().expect("open");
        scope.resolve::<LightweightService>().expect("warmup");
        b.iter(|| black_box(scope.resolve::<LightweightService>().expect("resolve")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_service_registration,
    bench_resolution_cold_vs_warm,
    bench_scope_overhead
);
criterion_main!(benches);
