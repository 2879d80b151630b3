//! Комплексные сценарии ошибок: каждая ошибка резолюции несёт
//! человекочитаемый путь по графу зависимостей.

use std::sync::Arc;

use container::{
    Constructors, Container, DIError, DisposableTransientPolicy, Dispose, Inject, RegisterOptions,
    Reuse, Rules, RulesConfig,
};

#[derive(Debug)]
struct A {
    _b: Arc<B>,
}
#[derive(Debug)]
struct B {
    _a: Arc<A>,
}

fn register_cycle(container: &Container) {
    container
        .register::<A>(
            Constructors::new().ctor1::<Inject<B>, _>(|b| A { _b: b }),
            RegisterOptions::new(),
        )
        .expect("register A");
    container
        .register::<B>(
            Constructors::new().ctor1::<Inject<A>, _>(|a| B { _a: a }),
            RegisterOptions::new(),
        )
        .expect("register B");
}

#[test]
fn test_cycle_fails_fast_without_overflow() {
    let container = Container::new();
    register_cycle(&container);

    let error = container.resolve::<A>().expect_err("cycle");
    match &error {
        DIError::RecursiveDependency { chain } => {
            let rendered = chain.to_string();
            // Цепочка показывает весь цикл: A -> B -> A
            assert!(rendered.matches("::A").count() >= 2, "{rendered}");
            assert!(rendered.contains("::B"), "{rendered}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_cycle_detected_in_validate() {
    let container = Container::new();
    register_cycle(&container);

    let errors = container.validate();
    assert_eq!(errors.len(), 2, "оба плана содержат цикл");
    for error in errors {
        assert!(matches!(error, DIError::RecursiveDependency { .. }));
    }
}

#[test]
fn test_unresolved_error_renders_full_path() {
    #[derive(Debug)]
    struct Missing;
    #[derive(Debug)]
    struct Middle {
        _missing: Arc<Missing>,
    }
    #[derive(Debug)]
    struct Top {
        _middle: Arc<Middle>,
    }

    let container = Container::new();
    container
        .register::<Middle>(
            Constructors::new().ctor1::<Inject<Missing>, _>(|missing| Middle { _missing: missing }),
            RegisterOptions::new(),
        )
        .expect("middle");
    container
        .register::<Top>(
            Constructors::new().ctor1::<Inject<Middle>, _>(|middle| Top { _middle: middle }),
            RegisterOptions::new(),
        )
        .expect("top");

    let error = container.resolve::<Top>().expect_err("missing dep");
    let message = error.to_string();
    // Диагностика: Top -> Middle -> Missing
    let top_pos = message.find("Top").expect("Top in message");
    let middle_pos = message.find("Middle").expect("Middle in message");
    let missing_pos = message.find("Missing").expect("Missing in message");
    assert!(top_pos < middle_pos && middle_pos < missing_pos, "{message}");
}

#[test]
fn test_constructor_selection_ambiguity() {
    struct Dep1;
    struct Dep2;
    #[derive(Debug)]
    struct Ambiguous;

    let container = Container::new();
    container.register_instance(Dep1).expect("dep1");
    container.register_instance(Dep2).expect("dep2");
    container
        .register::<Ambiguous>(
            Constructors::new()
                .ctor1::<Inject<Dep1>, _>(|_| Ambiguous)
                .ctor1::<Inject<Dep2>, _>(|_| Ambiguous),
            RegisterOptions::new(),
        )
        .expect("register");

    let error = container.resolve::<Ambiguous>().expect_err("ambiguous");
    assert!(matches!(error, DIError::ConstructorSelection { .. }));
}

#[test]
fn test_constructor_selection_none_resolvable() {
    struct Missing1;
    struct Missing2;
    #[derive(Debug)]
    struct Unbuildable;

    let container = Container::new();
    container
        .register::<Unbuildable>(
            Constructors::new()
                .ctor1::<Inject<Missing1>, _>(|_| Unbuildable)
                .ctor1::<Inject<Missing2>, _>(|_| Unbuildable),
            RegisterOptions::new(),
        )
        .expect("register");

    let error = container.resolve::<Unbuildable>().expect_err("unbuildable");
    assert!(matches!(error, DIError::ConstructorSelection { .. }));
}

#[test]
fn test_optional_param_falls_back_to_default() {
    struct OptionalDep {
        level: u8,
    }
    struct Service {
        level: u8,
    }

    let container = Container::new();
    container
        .register::<Service>(
            Constructors::new().with(
                container::ConstructorSpec::new1::<Inject<OptionalDep>, Service, _>(|dep| {
                    Service { level: dep.level }
                })
                .param_default::<OptionalDep>(|| OptionalDep { level: 9 }),
            ),
            RegisterOptions::new(),
        )
        .expect("register");

    // OptionalDep не зарегистрирован: параметр берёт заявленный default
    let service = container.resolve::<Service>().expect("resolve");
    assert_eq!(service.level, 9);
}

#[derive(Debug)]
struct LeakyResource;

impl Dispose for LeakyResource {
    fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[test]
fn test_disposable_transient_policy_error() {
    let container = Container::with_rules(
        Rules::default().with_disposable_transient(DisposableTransientPolicy::Error),
    );
    container
        .register_disposable::<LeakyResource>(
            Constructors::new().ctor0(|| LeakyResource),
            RegisterOptions::new().reuse(Reuse::Transient),
        )
        .expect("register");

    let error = container.resolve::<LeakyResource>().expect_err("policy");
    assert!(matches!(error, DIError::DisposableTransient { .. }));
}

#[test]
fn test_disposable_transient_policy_warn_still_resolves() {
    let container = Container::with_rules(
        Rules::default().with_disposable_transient(DisposableTransientPolicy::Warn),
    );
    container
        .register_disposable::<LeakyResource>(
            Constructors::new().ctor0(|| LeakyResource),
            RegisterOptions::new().reuse(Reuse::Transient),
        )
        .expect("register");

    // Warn: резолюция успешна, утечка задокументирована в логе
    container.resolve::<LeakyResource>().expect("resolve");
}

#[test]
fn test_error_classification() {
    let container = Container::new();
    register_cycle(&container);
    let cycle_error = container.resolve::<A>().expect_err("cycle");
    assert_eq!(cycle_error.category(), "cycle");
    assert!(!cycle_error.is_recoverable());

    #[derive(Debug)]
    struct NotThere;
    let unresolved = Container::new()
        .resolve::<NotThere>()
        .expect_err("unresolved");
    assert_eq!(unresolved.category(), "unresolved");
}

#[test]
fn test_config_rejects_unknown_policy() {
    let error = RulesConfig::from_toml_str(r#"multiple_default_policy = "chaos""#)
        .expect("parses as string")
        .into_rules()
        .expect_err("unknown policy");
    assert!(matches!(error, DIError::Configuration { .. }));
}

#[test]
fn test_throw_policy_reports_conflict() {
    struct Dup;

    let container = Container::new();
    container
        .register::<Dup>(Constructors::new().ctor0(|| Dup), RegisterOptions::new())
        .expect("first");

    let error = container
        .register::<Dup>(
            Constructors::new().ctor0(|| Dup),
            RegisterOptions::new().if_already(container::IfAlreadyRegistered::Throw),
        )
        .expect_err("duplicate");
    assert!(matches!(error, DIError::Registration { .. }));
}
