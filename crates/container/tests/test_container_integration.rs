//! Интеграционные тесты фасада контейнера: регистрация -> резолюция.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use container::{
    Constructors, Container, DIError, DynConstructors, Inject, InjectDyn, MultipleDefaultPolicy,
    RegisterOptions, Reuse, Rules,
};

static FOO_CONSTRUCTED: AtomicU32 = AtomicU32::new(0);

trait IFoo: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u32;
}

#[derive(Debug)]
struct Foo {
    id: u32,
}

impl IFoo for Foo {
    fn id(&self) -> u32 {
        self.id
    }
}

struct Bar {
    foo: Arc<dyn IFoo>,
}

#[test]
fn test_register_then_resolve_round_trip() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 7 }),
            RegisterOptions::new(),
        )
        .expect("register");

    let foo = container.resolve::<Foo>().expect("resolve");
    assert_eq!(foo.id, 7);
}

#[test]
fn test_singleton_dependency_shared_between_transients() {
    // Сценарий: IFoo -> Foo (Singleton), Bar(IFoo) (Transient).
    // Два Bar - разные экземпляры, их foo - один и тот же Foo.
    let container = Container::new();
    container
        .register_dyn::<dyn IFoo>(
            DynConstructors::new().ctor0(|| {
                let id = FOO_CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                Arc::new(Foo { id }) as Arc<dyn IFoo>
            }),
            RegisterOptions::new().reuse(Reuse::Singleton),
        )
        .expect("register IFoo");
    container
        .register::<Bar>(
            Constructors::new().ctor1::<InjectDyn<dyn IFoo>, _>(|foo| Bar { foo }),
            RegisterOptions::new().reuse(Reuse::Transient),
        )
        .expect("register Bar");

    let bar_one = container.resolve::<Bar>().expect("first Bar");
    let bar_two = container.resolve::<Bar>().expect("second Bar");

    assert!(!Arc::ptr_eq(&bar_one, &bar_two), "Bar is transient");
    assert!(
        Arc::ptr_eq(&bar_one.foo, &bar_two.foo),
        "Foo is a shared singleton"
    );
    assert_eq!(bar_one.foo.id(), bar_two.foo.id());
}

#[test]
fn test_transient_freshness() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 1 }),
            RegisterOptions::new().reuse(Reuse::Transient),
        )
        .expect("register");

    let mut instances = Vec::new();
    for _ in 0..5 {
        instances.push(container.resolve::<Foo>().expect("resolve"));
    }
    for (i, left) in instances.iter().enumerate() {
        for right in &instances[i + 1..] {
            assert!(!Arc::ptr_eq(left, right), "transient must be fresh");
        }
    }
}

#[test]
fn test_keyed_resolution_picks_keyed_entry() {
    let container = Container::new();
    container
        .register_dyn::<dyn IFoo>(
            DynConstructors::new().ctor0(|| Arc::new(Foo { id: 1 }) as Arc<dyn IFoo>),
            RegisterOptions::new().keyed("a"),
        )
        .expect("register a");
    container
        .register_dyn::<dyn IFoo>(
            DynConstructors::new().ctor0(|| Arc::new(Foo { id: 2 }) as Arc<dyn IFoo>),
            RegisterOptions::new().keyed("b"),
        )
        .expect("register b");

    let a = container.resolve_dyn_keyed::<dyn IFoo>("a").expect("a");
    let b = container.resolve_dyn_keyed::<dyn IFoo>("b").expect("b");
    assert_eq!(a.id(), 1);
    assert_eq!(b.id(), 2);
}

#[test]
fn test_keyed_only_registrations_do_not_satisfy_default_request() {
    let container = Container::new();
    container
        .register_dyn::<dyn IFoo>(
            DynConstructors::new().ctor0(|| Arc::new(Foo { id: 1 }) as Arc<dyn IFoo>),
            RegisterOptions::new().keyed("a"),
        )
        .expect("register a");
    container
        .register_dyn::<dyn IFoo>(
            DynConstructors::new().ctor0(|| Arc::new(Foo { id: 2 }) as Arc<dyn IFoo>),
            RegisterOptions::new().keyed("b"),
        )
        .expect("register b");

    let error = container.resolve_dyn::<dyn IFoo>().expect_err("no default");
    assert!(matches!(error, DIError::UnresolvedService { .. }));
}

#[test]
fn test_multiple_default_policy_error_vs_last_registered() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 1 }),
            RegisterOptions::new(),
        )
        .expect("first");
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 2 }),
            RegisterOptions::new(),
        )
        .expect("second (AppendNotKeyed)");

    // Политика по умолчанию - явная ошибка неоднозначности
    let error = container.resolve::<Foo>().expect_err("ambiguous");
    assert!(matches!(error, DIError::AmbiguousService { count: 2, .. }));

    // Тот же реестр, политика last-wins
    let last_wins = container
        .with_replaced_rules(Rules::default().with_multiple_default_policy(
            MultipleDefaultPolicy::PreferLastRegistered,
        ));
    let foo = last_wins.resolve::<Foo>().expect("last registered wins");
    assert_eq!(foo.id, 2);
}

#[test]
fn test_try_resolve_returns_none_without_error() {
    let container = Container::new();
    assert!(container.try_resolve::<Foo>().is_none());
}

#[test]
fn test_replace_registration_invalidates_plan_cache() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 1 }),
            RegisterOptions::new(),
        )
        .expect("register");
    assert_eq!(container.resolve::<Foo>().expect("v1").id, 1);

    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 2 }),
            RegisterOptions::new().if_already(container::IfAlreadyRegistered::Replace),
        )
        .expect("replace");
    // Новая версия реестра - новый план, старый кэш инвалидирован
    assert_eq!(container.resolve::<Foo>().expect("v2").id, 2);
}

#[test]
fn test_member_injection() {
    struct Settings {
        verbosity: u8,
    }
    struct Service {
        verbosity: u8,
    }

    let container = Container::new();
    container
        .register_instance(Settings { verbosity: 3 })
        .expect("settings");
    container
        .register::<Service>(
            Constructors::new()
                .ctor0(|| Service { verbosity: 0 })
                .member::<Inject<Settings>, _>("verbosity", |service, settings| {
                    service.verbosity = settings.verbosity;
                }),
            RegisterOptions::new(),
        )
        .expect("service");

    let service = container.resolve::<Service>().expect("resolve");
    assert_eq!(service.verbosity, 3);
}

#[test]
fn test_constructor_selection_prefers_most_resolvable_params() {
    struct Db;
    struct Cache;
    struct Service {
        used_params: usize,
    }

    let container = Container::new();
    container.register_instance(Db).expect("db");
    container.register_instance(Cache).expect("cache");
    container
        .register::<Service>(
            Constructors::new()
                .ctor0(|| Service { used_params: 0 })
                .ctor2::<Inject<Db>, Inject<Cache>, _>(|_, _| Service { used_params: 2 }),
            RegisterOptions::new(),
        )
        .expect("service");

    let service = container.resolve::<Service>().expect("resolve");
    assert_eq!(service.used_params, 2);
}

#[test]
fn test_delegate_receives_resolver_context() {
    struct Db;
    struct Repo {
        db: Arc<Db>,
    }

    let container = Container::new();
    container
        .register_singleton::<Db, _>(|_| Ok(Db))
        .expect("db");
    container
        .register_transient::<Repo, _>(|ctx| {
            Ok(Repo {
                db: ctx.resolve::<Db>()?,
            })
        })
        .expect("repo");

    let repo_one = container.resolve::<Repo>().expect("repo");
    let repo_two = container.resolve::<Repo>().expect("repo");
    assert!(Arc::ptr_eq(&repo_one.db, &repo_two.db));
}

#[test]
fn test_validate_reports_unresolvable_without_constructing() {
    static CONSTRUCTED: AtomicU32 = AtomicU32::new(0);

    struct Missing;
    struct Broken {
        _missing: Arc<Missing>,
    }

    let container = Container::new();
    container
        .register::<Broken>(
            Constructors::new().ctor1::<Inject<Missing>, _>(|missing| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                Broken { _missing: missing }
            }),
            RegisterOptions::new(),
        )
        .expect("register");

    let errors = container.validate();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], DIError::UnresolvedService { .. }));
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 0, "validate must not construct");
}

#[test]
fn test_stats_track_resolutions() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 1 }),
            RegisterOptions::new(),
        )
        .expect("register");

    container.resolve::<Foo>().expect("ok");
    container.resolve::<Foo>().expect("ok");
    let _ = container.resolve::<Bar>();

    let stats = container.stats();
    assert_eq!(stats.registrations, 1);
    assert_eq!(stats.resolutions_ok, 2);
    assert_eq!(stats.resolutions_failed, 1);
    assert!(stats.plan_cache_hits >= 1, "second resolve hits plan cache");
}

#[test]
fn test_container_dispose_rejects_operations() {
    let container = Container::new();
    container
        .register::<Foo>(
            Constructors::new().ctor0(|| Foo { id: 1 }),
            RegisterOptions::new(),
        )
        .expect("register");

    container.dispose().expect("dispose");
    assert!(container.is_disposed());

    assert!(matches!(
        container.resolve::<Foo>(),
        Err(DIError::ContainerDisposed { .. })
    ));
    assert!(matches!(
        container.open_scope(),
        Err(DIError::ContainerDisposed { .. })
    ));
}

#[test]
fn test_unknown_service_resolver_fallback() {
    use container::factory::{DebugInstance, FactoryKind, Setup};
    use container::{AnyArc, Factory, UnknownServiceFn};

    struct NotRegistered {
        marker: u8,
    }

    let fallback: UnknownServiceFn = Arc::new(|request| {
        if request.service_type == std::any::TypeId::of::<NotRegistered>() {
            Some(Factory::new(
                Reuse::Transient,
                Setup::default(),
                FactoryKind::Instance(DebugInstance(
                    Arc::new(NotRegistered { marker: 42 }) as AnyArc
                )),
            ))
        } else {
            None
        }
    });

    let container =
        Container::with_rules(Rules::default().with_unknown_service_resolver(fallback));
    let value = container
        .resolve::<NotRegistered>()
        .expect("fallback resolver");
    assert_eq!(value.marker, 42);
}
