//! Фасад контейнера: registrar + resolver поверх компонентов ядра.
//!
//! Container владеет одной версией реестра (через атомарную ссылку),
//! неизменяемыми Rules, root scope (хранилище singleton'ов) и кэшем
//! планов. `with_replaced_rules` создаёт новый фасад поверх ТОГО ЖЕ
//! реестра и root scope, но с другими правилами и свежим кэшем - ничего
//! не мутируется на месте.
//!
//! Контейнер - пассивная библиотека без собственных потоков: все операции
//! безопасны при параллельных вызовах с потоков вызывающего кода.

use std::any::TypeId;
use std::sync::Arc;

use tracing::{debug, info};

use crate::compiled::{CompiledFactory, PlanCache, PlanKey};
use crate::config::RulesConfig;
use crate::errors::{DIError, DIResult};
use crate::factory::{
    disposer_concrete, disposer_dyn, finish_concrete, finish_dyn, ConditionFn, ConstructorFactory,
    Constructors, ConvertFn, DebugDelegate, DebugInstance, Dispose, DynConstructors, Factory,
    FactoryKind, Setup,
};
use crate::key::{AnyArc, ServiceKey};
use crate::plan::{ArgTypes, PlanBuilder};
use crate::registry::{IfAlreadyRegistered, Registration, RegistryMap};
use crate::reuse::Reuse;
use crate::rules::Rules;
use crate::scope::Scope;
use crate::stats::{ContainerStats, StatsCollector};
use crate::wrappers::{Func, Lazy, Many, ManyDyn};

/// Опции регистрации.
#[derive(Clone, Default)]
pub struct RegisterOptions {
    /// Reuse; None - default_reuse из Rules.
    pub reuse: Option<Reuse>,
    pub key: Option<ServiceKey>,
    pub if_already: IfAlreadyRegistered,
    /// Opt-in трекинг disposable transient текущим scope.
    pub allow_disposable_transient: bool,
    /// Условие применимости фабрики к запросу.
    pub condition: Option<ConditionFn>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reuse(mut self, reuse: Reuse) -> Self {
        self.reuse = Some(reuse);
        self
    }

    pub fn keyed(mut self, key: impl Into<ServiceKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn if_already(mut self, policy: IfAlreadyRegistered) -> Self {
        self.if_already = policy;
        self
    }

    pub fn allow_disposable_transient(mut self) -> Self {
        self.allow_disposable_transient = true;
        self
    }

    pub fn when(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Привязка одной реализации к альтернативному сервисному типу
/// (для register_many). Строится макросом [`service_bindings!`].
pub struct ServiceBinding {
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Конвертация хранимого конкретного значения в представление сервиса.
    pub convert: Option<ConvertFn>,
}

/// Построить привязки реализации к нескольким trait object сервисам:
///
/// ```ignore
/// let bindings = service_bindings!(PluginImpl => dyn Plugin, dyn Describable);
/// container.register_many(Constructors::new().ctor0(PluginImpl::new), bindings, RegisterOptions::new())?;
/// ```
#[macro_export]
macro_rules! service_bindings {
    ($impl:ty => $($svc:ty),+ $(,)?) => {{
        vec![
            $(
                $crate::container::ServiceBinding {
                    type_id: ::std::any::TypeId::of::<$svc>(),
                    type_name: ::std::any::type_name::<$svc>(),
                    convert: Some(::std::sync::Arc::new(|value: $crate::key::AnyArc| {
                        let concrete = value.downcast::<$impl>().map_err(|_| {
                            $crate::errors::DIError::mismatch(
                                ::std::any::type_name::<$impl>(),
                                "service binding",
                            )
                        })?;
                        let view: ::std::sync::Arc<$svc> = concrete;
                        Ok(::std::sync::Arc::new(view) as $crate::key::AnyArc)
                    })),
                }
            ),+
        ]
    }};
}

/// Контекст текущей резолюции, передаваемый delegate-фабрикам и wrapper'ам.
///
/// Дешёвый для клонирования (набор Arc); несёт текущий scope и
/// runtime-аргументы вызова.
#[derive(Clone)]
pub struct ResolveContext {
    container: Container,
    scope: Arc<Scope>,
    args: Option<Arc<Vec<AnyArc>>>,
}

impl ResolveContext {
    pub(crate) fn new(container: Container, scope: Arc<Scope>, args: Option<Arc<Vec<AnyArc>>>) -> Self {
        Self {
            container,
            scope,
            args,
        }
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> DIResult<Arc<T>> {
        self.container.resolve_in::<T>(&self.scope, None)
    }

    pub fn resolve_keyed<T: Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<T>> {
        self.container.resolve_in::<T>(&self.scope, Some(key.into()))
    }

    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    pub fn resolve_dyn<S: ?Sized + Send + Sync + 'static>(&self) -> DIResult<Arc<S>> {
        self.container.resolve_dyn_in::<S>(&self.scope, None)
    }

    pub fn resolve_dyn_keyed<S: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<S>> {
        self.container
            .resolve_dyn_in::<S>(&self.scope, Some(key.into()))
    }

    pub(crate) fn current_scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Scope, которому принадлежит экземпляр с данным reuse.
    pub(crate) fn scope_for(&self, reuse: &Reuse, type_name: &'static str) -> DIResult<Arc<Scope>> {
        match reuse {
            Reuse::Singleton => Ok(Arc::clone(&self.container.root_scope)),
            Reuse::Scoped => {
                if self.scope.is_root() {
                    let mut chain = crate::errors::ResolutionChain::new();
                    chain.push(type_name, None);
                    Err(DIError::no_scope(type_name, None, chain))
                } else {
                    Ok(Arc::clone(&self.scope))
                }
            }
            Reuse::ScopedTo(name) => self.scope.find_named(name).ok_or_else(|| {
                let mut chain = crate::errors::ResolutionChain::new();
                chain.push(type_name, None);
                DIError::no_scope(type_name, Some(name.to_string()), chain)
            }),
            Reuse::Transient => Ok(Arc::clone(&self.scope)),
        }
    }

    pub(crate) fn runtime_arg(&self, index: usize) -> DIResult<AnyArc> {
        self.args
            .as_ref()
            .and_then(|args| args.get(index).cloned())
            .ok_or_else(|| DIError::mismatch("runtime argument", "argument pack"))
    }
}

/// DI контейнер: публичная registrar + resolver поверхность.
#[derive(Clone)]
pub struct Container {
    name: Arc<str>,
    registry: Arc<RegistryMap>,
    rules: Arc<Rules>,
    root_scope: Arc<Scope>,
    cache: Arc<PlanCache>,
    stats: Arc<StatsCollector>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_rules(Rules::default())
    }

    pub fn with_rules(rules: Rules) -> Self {
        info!("🏗️ creating container with rules: {rules:?}");
        Self {
            name: Arc::from("default"),
            registry: Arc::new(RegistryMap::new()),
            rules: Arc::new(rules),
            root_scope: Scope::root(),
            cache: Arc::new(PlanCache::new()),
            stats: Arc::new(StatsCollector::default()),
        }
    }

    pub fn named(name: impl AsRef<str>) -> Self {
        let mut container = Self::new();
        container.name = Arc::from(name.as_ref());
        container
    }

    /// Новый фасад: тот же реестр и root scope, другие правила, свежий кэш.
    pub fn with_replaced_rules(&self, rules: Rules) -> Self {
        Self {
            name: Arc::clone(&self.name),
            registry: Arc::clone(&self.registry),
            rules: Arc::new(rules),
            root_scope: Arc::clone(&self.root_scope),
            cache: Arc::new(PlanCache::new()),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    // === REGISTRAR SURFACE ===

    fn ensure_alive(&self, operation: &'static str) -> DIResult<()> {
        if self.root_scope.is_disposed() {
            Err(DIError::ContainerDisposed { operation })
        } else {
            Ok(())
        }
    }

    fn add_registration(
        &self,
        service_type: TypeId,
        type_name: &'static str,
        factory: Factory,
        convert: Option<ConvertFn>,
        options: &RegisterOptions,
    ) -> DIResult<()> {
        self.ensure_alive("register")?;
        let registration = Registration {
            service_type,
            type_name,
            key: options.key.clone(),
            factory: Arc::new(factory),
            convert,
            order: self.registry.next_order(),
        };
        self.registry.register(registration, options.if_already)
    }

    fn setup_from(&self, options: &RegisterOptions) -> Setup {
        Setup {
            condition: options.condition.clone(),
            disposer: None,
            allow_disposable_transient: options.allow_disposable_transient,
            prevent_disposal: false,
        }
    }

    fn reuse_from(&self, options: &RegisterOptions) -> Reuse {
        options
            .reuse
            .clone()
            .unwrap_or_else(|| self.rules.default_reuse.clone())
    }

    /// Регистрация конкретного типа через спецификации конструкторов.
    pub fn register<T: Send + Sync + 'static>(
        &self,
        ctors: Constructors<T>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let (specs, members) = ctors.into_factory_parts();
        let factory = Factory::new(
            self.reuse_from(&options),
            self.setup_from(&options),
            FactoryKind::Constructor(ConstructorFactory {
                impl_type_name: std::any::type_name::<T>(),
                constructors: specs,
                members,
                finish: finish_concrete::<T>(),
            }),
        );
        self.add_registration(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            factory,
            None,
            &options,
        )
    }

    /// Как [`register`](Self::register), плюс disposal-трекинг через [`Dispose`].
    pub fn register_disposable<T: Dispose + 'static>(
        &self,
        ctors: Constructors<T>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let (specs, members) = ctors.into_factory_parts();
        let mut setup = self.setup_from(&options);
        setup.disposer = Some(disposer_concrete::<T>());
        let factory = Factory::new(
            self.reuse_from(&options),
            setup,
            FactoryKind::Constructor(ConstructorFactory {
                impl_type_name: std::any::type_name::<T>(),
                constructors: specs,
                members,
                finish: finish_concrete::<T>(),
            }),
        );
        self.add_registration(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            factory,
            None,
            &options,
        )
    }

    /// Регистрация trait object сервиса.
    pub fn register_dyn<S: ?Sized + Send + Sync + 'static>(
        &self,
        ctors: DynConstructors<S>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let factory = Factory::new(
            self.reuse_from(&options),
            self.setup_from(&options),
            FactoryKind::Constructor(ConstructorFactory {
                impl_type_name: std::any::type_name::<S>(),
                constructors: ctors.specs,
                members: Vec::new(),
                finish: finish_dyn::<S>(),
            }),
        );
        self.add_registration(
            TypeId::of::<S>(),
            std::any::type_name::<S>(),
            factory,
            None,
            &options,
        )
    }

    /// Trait object сервис с disposal-трекингом.
    pub fn register_dyn_disposable<S: ?Sized + Dispose + 'static>(
        &self,
        ctors: DynConstructors<S>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let mut setup = self.setup_from(&options);
        setup.disposer = Some(disposer_dyn::<S>());
        let factory = Factory::new(
            self.reuse_from(&options),
            setup,
            FactoryKind::Constructor(ConstructorFactory {
                impl_type_name: std::any::type_name::<S>(),
                constructors: ctors.specs,
                members: Vec::new(),
                finish: finish_dyn::<S>(),
            }),
        );
        self.add_registration(
            TypeId::of::<S>(),
            std::any::type_name::<S>(),
            factory,
            None,
            &options,
        )
    }

    /// Delegate-фабрика конкретного типа.
    pub fn register_delegate<T, F>(&self, reuse: Reuse, f: F) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<T> + Send + Sync + 'static,
    {
        self.register_delegate_opts::<T, F>(f, RegisterOptions::new().reuse(reuse))
    }

    pub fn register_delegate_opts<T, F>(&self, f: F, options: RegisterOptions) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<T> + Send + Sync + 'static,
    {
        let delegate = Arc::new(move |ctx: &ResolveContext| {
            let value = f(ctx)?;
            Ok(Arc::new(value) as AnyArc)
        });
        let factory = Factory::new(
            self.reuse_from(&options),
            self.setup_from(&options),
            FactoryKind::Delegate(DebugDelegate(delegate)),
        );
        self.add_registration(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            factory,
            None,
            &options,
        )
    }

    /// Delegate-фабрика trait object сервиса.
    pub fn register_dyn_delegate<S, F>(&self, reuse: Reuse, f: F) -> DIResult<()>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<Arc<S>> + Send + Sync + 'static,
    {
        self.register_dyn_delegate_opts::<S, F>(f, RegisterOptions::new().reuse(reuse))
    }

    pub fn register_dyn_delegate_opts<S, F>(&self, f: F, options: RegisterOptions) -> DIResult<()>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<Arc<S>> + Send + Sync + 'static,
    {
        let delegate = Arc::new(move |ctx: &ResolveContext| {
            let value = f(ctx)?;
            Ok(Arc::new(value) as AnyArc)
        });
        let factory = Factory::new(
            self.reuse_from(&options),
            self.setup_from(&options),
            FactoryKind::Delegate(DebugDelegate(delegate)),
        );
        self.add_registration(
            TypeId::of::<S>(),
            std::any::type_name::<S>(),
            factory,
            None,
            &options,
        )
    }

    /// Удобная форма: singleton delegate.
    pub fn register_singleton<T, F>(&self, f: F) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<T> + Send + Sync + 'static,
    {
        self.register_delegate::<T, F>(Reuse::Singleton, f)
    }

    pub fn register_transient<T, F>(&self, f: F) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext) -> DIResult<T> + Send + Sync + 'static,
    {
        self.register_delegate::<T, F>(Reuse::Transient, f)
    }

    /// Регистрация готового экземпляра: никогда не перестраивается и не
    /// утилизируется контейнером.
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) -> DIResult<()> {
        self.register_instance_opts(value, RegisterOptions::new())
    }

    pub fn register_instance_opts<T: Send + Sync + 'static>(
        &self,
        value: T,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let mut setup = self.setup_from(&options);
        setup.prevent_disposal = true;
        let factory = Factory::new(
            Reuse::Singleton,
            setup,
            FactoryKind::Instance(DebugInstance(Arc::new(value) as AnyArc)),
        );
        self.add_registration(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            factory,
            None,
            &options,
        )
    }

    pub fn register_dyn_instance<S: ?Sized + Send + Sync + 'static>(
        &self,
        value: Arc<S>,
    ) -> DIResult<()> {
        self.register_dyn_instance_opts(value, RegisterOptions::new())
    }

    pub fn register_dyn_instance_opts<S: ?Sized + Send + Sync + 'static>(
        &self,
        value: Arc<S>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        let mut setup = self.setup_from(&options);
        setup.prevent_disposal = true;
        let factory = Factory::new(
            Reuse::Singleton,
            setup,
            FactoryKind::Instance(DebugInstance(Arc::new(value) as AnyArc)),
        );
        self.add_registration(
            TypeId::of::<S>(),
            std::any::type_name::<S>(),
            factory,
            None,
            &options,
        )
    }

    /// Декоратор конкретного сервиса: применяется в порядке регистрации,
    /// последний зарегистрированный оборачивает самым внешним.
    pub fn register_decorator<T, F>(&self, f: F) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext, Arc<T>) -> DIResult<T> + Send + Sync + 'static,
    {
        self.register_decorator_opts::<T, F>(f, RegisterOptions::new())
    }

    pub fn register_decorator_opts<T, F>(&self, f: F, options: RegisterOptions) -> DIResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolveContext, Arc<T>) -> DIResult<T> + Send + Sync + 'static,
    {
        let decorate = Arc::new(move |ctx: &ResolveContext, inner: AnyArc| {
            let inner = inner
                .downcast::<T>()
                .map_err(|_| DIError::mismatch(std::any::type_name::<T>(), "decorator"))?;
            let decorated = f(ctx, inner)?;
            Ok(Arc::new(decorated) as AnyArc)
        });
        self.add_decorator_registration::<T>(decorate, options)
    }

    /// Декоратор trait object сервиса.
    pub fn register_dyn_decorator<S, F>(&self, f: F) -> DIResult<()>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolveContext, Arc<S>) -> DIResult<Arc<S>> + Send + Sync + 'static,
    {
        self.register_dyn_decorator_opts::<S, F>(f, RegisterOptions::new())
    }

    pub fn register_dyn_decorator_opts<S, F>(&self, f: F, options: RegisterOptions) -> DIResult<()>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolveContext, Arc<S>) -> DIResult<Arc<S>> + Send + Sync + 'static,
    {
        let decorate = Arc::new(move |ctx: &ResolveContext, inner: AnyArc| {
            let inner = inner
                .downcast::<Arc<S>>()
                .map_err(|_| DIError::mismatch(std::any::type_name::<S>(), "decorator"))?;
            let decorated = f(ctx, (*inner).clone())?;
            Ok(Arc::new(decorated) as AnyArc)
        });
        self.add_decorator_registration::<S>(decorate, options)
    }

    fn add_decorator_registration<S: ?Sized + 'static>(
        &self,
        decorate: crate::factory::DecorateFn,
        options: RegisterOptions,
    ) -> DIResult<()> {
        // Ключ декоратора - условие "применять только к запросам с этим ключом"
        let condition = match (&options.condition, &options.key) {
            (Some(condition), None) => Some(condition.clone()),
            (None, Some(key)) => {
                let key = key.clone();
                let key_condition: ConditionFn =
                    Arc::new(move |request| request.key.as_ref() == Some(&key));
                Some(key_condition)
            }
            (Some(condition), Some(key)) => {
                let condition = condition.clone();
                let key = key.clone();
                let both: ConditionFn = Arc::new(move |request| {
                    request.key.as_ref() == Some(&key) && condition(request)
                });
                Some(both)
            }
            (None, None) => None,
        };

        let factory = Factory::new(
            Reuse::Transient,
            Setup::default(),
            FactoryKind::Decorator(crate::factory::DecoratorFactory {
                decorate,
                condition,
            }),
        );
        self.ensure_alive("register")?;
        // Декоратор хранится под сервисным типом, но без ключа записи:
        // кандидатом выбора он не является и в конфликтах ключей не участвует
        let registration = Registration {
            service_type: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
            key: None,
            factory: Arc::new(factory),
            convert: None,
            order: self.registry.next_order(),
        };
        self.registry
            .register(registration, IfAlreadyRegistered::AppendNotKeyed)
    }

    /// Одна реализация под несколькими сервисными типами, с общей фабрикой
    /// (singleton разделяется между всеми представлениями).
    pub fn register_many<T: Send + Sync + 'static>(
        &self,
        ctors: Constructors<T>,
        bindings: Vec<ServiceBinding>,
        options: RegisterOptions,
    ) -> DIResult<()> {
        self.ensure_alive("register")?;
        let (specs, members) = ctors.into_factory_parts();
        let factory = Arc::new(Factory::new(
            self.reuse_from(&options),
            self.setup_from(&options),
            FactoryKind::Constructor(ConstructorFactory {
                impl_type_name: std::any::type_name::<T>(),
                constructors: specs,
                members,
                finish: finish_concrete::<T>(),
            }),
        ));

        for binding in bindings {
            let registration = Registration {
                service_type: binding.type_id,
                type_name: binding.type_name,
                key: options.key.clone(),
                factory: Arc::clone(&factory),
                convert: binding.convert,
                order: self.registry.next_order(),
            };
            self.registry.register(registration, options.if_already)?;
        }
        Ok(())
    }

    /// Удалить регистрацию. Публикует новую версию реестра.
    pub fn unregister<T: ?Sized + 'static>(&self, key: Option<ServiceKey>) -> bool {
        self.registry.remove(TypeId::of::<T>(), key.as_ref())
    }

    // === RESOLVER SURFACE ===

    pub fn resolve<T: Send + Sync + 'static>(&self) -> DIResult<Arc<T>> {
        self.resolve_in::<T>(&self.root_scope, None)
    }

    pub fn resolve_keyed<T: Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<T>> {
        self.resolve_in::<T>(&self.root_scope, Some(key.into()))
    }

    /// `IfUnresolved::ReturnDefault` форма: None вместо ошибки.
    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    pub fn resolve_dyn<S: ?Sized + Send + Sync + 'static>(&self) -> DIResult<Arc<S>> {
        self.resolve_dyn_in::<S>(&self.root_scope, None)
    }

    pub fn resolve_dyn_keyed<S: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<S>> {
        self.resolve_dyn_in::<S>(&self.root_scope, Some(key.into()))
    }

    pub fn try_resolve_dyn<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.resolve_dyn::<S>().ok()
    }

    /// Резолюция с runtime-аргументами, сопоставляемыми параметрам
    /// конструктора по типу. План с аргументами не кэшируется.
    pub fn resolve_with_args<T: Send + Sync + 'static>(
        &self,
        args: Vec<AnyArc>,
    ) -> DIResult<Arc<T>> {
        let value = self.resolve_erased_in(
            &self.root_scope,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            None,
            None,
            Some(args),
        )?;
        downcast_concrete::<T>(value)
    }

    pub(crate) fn resolve_in<T: Send + Sync + 'static>(
        &self,
        scope: &Arc<Scope>,
        key: Option<ServiceKey>,
    ) -> DIResult<Arc<T>> {
        let value = self.resolve_erased_in(
            scope,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            key,
            None,
            None,
        )?;
        downcast_concrete::<T>(value)
    }

    pub(crate) fn resolve_dyn_in<S: ?Sized + Send + Sync + 'static>(
        &self,
        scope: &Arc<Scope>,
        key: Option<ServiceKey>,
    ) -> DIResult<Arc<S>> {
        let value = self.resolve_erased_in(
            scope,
            TypeId::of::<S>(),
            std::any::type_name::<S>(),
            key,
            None,
            None,
        )?;
        downcast_dyn::<S>(value)
    }

    /// Type-erased ядро резолюции: кэш планов -> построение -> исполнение.
    pub(crate) fn resolve_erased_in(
        &self,
        scope: &Arc<Scope>,
        service_type: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
        args: Option<Vec<AnyArc>>,
    ) -> DIResult<AnyArc> {
        self.ensure_alive("resolve")?;

        let result = if let Some(arg_values) = args {
            // Планы с runtime-аргументами строятся на каждый вызов
            let arg_types = ArgTypes::new(&arg_values);
            let snapshot = self.registry.snapshot();
            let builder = PlanBuilder::new(&snapshot, &self.rules, Some(&arg_types));
            let expr = builder.build(service_type, type_name, key, required_type, None)?;
            let compiled = CompiledFactory::new(expr);
            let ctx = ResolveContext::new(
                self.clone(),
                Arc::clone(scope),
                Some(Arc::new(arg_values)),
            );
            compiled.execute(&ctx, self.rules.compile_threshold)
        } else {
            let plan_key: PlanKey = (service_type, key.clone(), required_type);
            let generation = self.registry.generation();
            let compiled = match self.cache.get(&plan_key, generation) {
                Some(compiled) => compiled,
                None => {
                    let snapshot = self.registry.snapshot();
                    let builder = PlanBuilder::new(&snapshot, &self.rules, None);
                    let expr = builder.build(service_type, type_name, key, required_type, None)?;
                    let compiled = Arc::new(CompiledFactory::new(expr));
                    self.cache
                        .insert(plan_key, Arc::clone(&compiled), generation);
                    compiled
                }
            };
            let ctx = ResolveContext::new(self.clone(), Arc::clone(scope), None);
            compiled.execute(&ctx, self.rules.compile_threshold)
        };

        match &result {
            Ok(_) => self.stats.record_success(),
            Err(error) => {
                self.stats.record_failure();
                debug!(type_name, error = %error, "resolution failed");
            }
        }
        result
    }

    /// Ленивая последовательность всех регистраций сервиса (keyed и
    /// unkeyed), каждый элемент строится по требованию.
    pub fn resolve_many<T: Send + Sync + 'static>(&self) -> Many<T> {
        Many::new(self.clone(), Arc::clone(&self.root_scope))
    }

    pub fn resolve_many_dyn<S: ?Sized + Send + Sync + 'static>(&self) -> ManyDyn<S> {
        ManyDyn::new(self.clone(), Arc::clone(&self.root_scope))
    }

    /// Отложенная one-shot резолюция с захватом текущего контекста.
    pub fn resolve_lazy<T: Send + Sync + 'static>(&self) -> Lazy<T> {
        Lazy::new(
            ResolveContext::new(self.clone(), Arc::clone(&self.root_scope), None),
            None,
        )
    }

    /// Замыкание-фабрика: резолвит `T` при каждом вызове, опционально с
    /// runtime-аргументами.
    pub fn resolve_func<T: Send + Sync + 'static>(&self) -> Func<T> {
        Func::new(self.clone(), Arc::clone(&self.root_scope), None)
    }

    // === SCOPES ===

    /// Открыть анонимный scope.
    pub fn open_scope(&self) -> DIResult<ScopeHandle> {
        self.ensure_alive("open_scope")?;
        Ok(ScopeHandle {
            container: self.clone(),
            scope: self.root_scope.child(None),
        })
    }

    /// Открыть именованный scope (например "web-request").
    pub fn open_named_scope(&self, name: impl Into<String>) -> DIResult<ScopeHandle> {
        self.ensure_alive("open_scope")?;
        Ok(ScopeHandle {
            container: self.clone(),
            scope: self.root_scope.child(Some(name.into())),
        })
    }

    /// Утилизировать контейнер: закрыть root scope со всеми singleton'ами.
    /// Открытые дочерние scope - громкая ошибка.
    pub fn dispose(&self) -> DIResult<()> {
        info!(container = %self.name, "disposing container");
        self.root_scope.close()
    }

    pub fn is_disposed(&self) -> bool {
        self.root_scope.is_disposed()
    }

    // === DIAGNOSTICS ===

    /// Построить (не исполняя) план каждой регистрации, собрать все ошибки,
    /// которые иначе всплыли бы только при первом использовании.
    pub fn validate(&self) -> Vec<DIError> {
        let snapshot = self.registry.snapshot();
        let builder = PlanBuilder::new(&snapshot, &self.rules, None);
        let mut errors = Vec::new();

        for entries in snapshot.values() {
            for registration in entries {
                if registration.factory.is_decorator() {
                    // Декораторы проверяются в составе базовых планов
                    continue;
                }
                if let Err(error) = builder.build_for_registration(registration, None) {
                    errors.push(error);
                }
            }
        }
        errors
    }

    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        let snapshot = self.registry.snapshot();
        RegistryMap::entries_of(&snapshot, TypeId::of::<T>())
            .iter()
            .any(|entry| !entry.factory.is_decorator())
    }

    pub fn registered_services(&self) -> Vec<(&'static str, Option<ServiceKey>, Reuse)> {
        self.registry.registered_services()
    }

    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            name: self.name.to_string(),
            service_types: self.registry.service_count(),
            registrations: self.registry.registration_count(),
            resolutions_ok: self.stats.resolutions_ok(),
            resolutions_failed: self.stats.resolutions_failed(),
            plan_cache_hits: self.cache.hit_count(),
            plan_cache_misses: self.cache.miss_count(),
            cached_plans: self.cache.len(),
            compiled_plans: self.cache.compiled_count(),
            singleton_instances: self.root_scope.instance_count(),
        }
    }

    pub(crate) fn registry(&self) -> &RegistryMap {
        &self.registry
    }

    pub(crate) fn root_scope(&self) -> &Arc<Scope> {
        &self.root_scope
    }
}

pub(crate) fn downcast_concrete<T: Send + Sync + 'static>(value: AnyArc) -> DIResult<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| DIError::mismatch(std::any::type_name::<T>(), "resolve"))
}

pub(crate) fn downcast_dyn<S: ?Sized + Send + Sync + 'static>(value: AnyArc) -> DIResult<Arc<S>> {
    let arc = value
        .downcast::<Arc<S>>()
        .map_err(|_| DIError::mismatch(std::any::type_name::<S>(), "resolve"))?;
    Ok((*arc).clone())
}

/// Хэндл открытого scope: та же resolver-поверхность, привязанная к scope.
///
/// Явная передача scope-хэндла вместо ambient-контекста: адаптер
/// ambient-скоупа - внешний коллаборатор, не часть ядра.
#[derive(Clone)]
pub struct ScopeHandle {
    container: Container,
    scope: Arc<Scope>,
}

impl ScopeHandle {
    pub fn name(&self) -> Option<&str> {
        self.scope.name()
    }

    pub fn is_closed(&self) -> bool {
        self.scope.is_disposed()
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> DIResult<Arc<T>> {
        self.guard()?;
        self.container.resolve_in::<T>(&self.scope, None)
    }

    pub fn resolve_keyed<T: Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<T>> {
        self.guard()?;
        self.container.resolve_in::<T>(&self.scope, Some(key.into()))
    }

    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    pub fn resolve_dyn<S: ?Sized + Send + Sync + 'static>(&self) -> DIResult<Arc<S>> {
        self.guard()?;
        self.container.resolve_dyn_in::<S>(&self.scope, None)
    }

    pub fn resolve_dyn_keyed<S: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> DIResult<Arc<S>> {
        self.guard()?;
        self.container
            .resolve_dyn_in::<S>(&self.scope, Some(key.into()))
    }

    pub fn resolve_many<T: Send + Sync + 'static>(&self) -> Many<T> {
        Many::new(self.container.clone(), Arc::clone(&self.scope))
    }

    pub fn resolve_lazy<T: Send + Sync + 'static>(&self) -> Lazy<T> {
        Lazy::new(
            ResolveContext::new(self.container.clone(), Arc::clone(&self.scope), None),
            None,
        )
    }

    pub fn resolve_func<T: Send + Sync + 'static>(&self) -> Func<T> {
        Func::new(self.container.clone(), Arc::clone(&self.scope), None)
    }

    /// Вложенный scope: текущий становится родителем.
    pub fn open_scope(&self) -> DIResult<ScopeHandle> {
        self.guard()?;
        Ok(ScopeHandle {
            container: self.container.clone(),
            scope: self.scope.child(None),
        })
    }

    pub fn open_named_scope(&self, name: impl Into<String>) -> DIResult<ScopeHandle> {
        self.guard()?;
        Ok(ScopeHandle {
            container: self.container.clone(),
            scope: self.scope.child(Some(name.into())),
        })
    }

    /// Закрыть scope: утилизация в обратном порядке создания.
    pub fn close(&self) -> DIResult<()> {
        self.scope.close()
    }

    pub(crate) fn container(&self) -> &Container {
        &self.container
    }

    pub(crate) fn scope_ref(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn guard(&self) -> DIResult<()> {
        if self.scope.is_disposed() {
            let mut chain = crate::errors::ResolutionChain::new();
            chain.push("<scope>", None);
            return Err(DIError::no_scope(
                "<scope>",
                self.scope.name().map(|name| name.to_string()),
                chain,
            ));
        }
        Ok(())
    }
}

/// Builder контейнера: правила из кода или из конфигурации.
pub struct ContainerBuilder {
    name: String,
    rules: Rules,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            name: "default".to_string(),
            rules: Rules::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rules(mut self, rules: Rules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_config(mut self, config: RulesConfig) -> DIResult<Self> {
        self.rules = config.into_rules()?;
        Ok(self)
    }

    pub fn build(self) -> Container {
        let mut container = Container::with_rules(self.rules);
        container.name = Arc::from(self.name.as_str());
        container
    }
}
