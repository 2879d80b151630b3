//! Построитель плана резолюции: рекурсивный спуск по графу зависимостей.
//!
//! Алгоритм для запроса (service_type, key, required_type):
//! 1. ищем кандидатов в снапшоте реестра (декораторы не кандидаты)
//! 2. ноль кандидатов -> цепочка fallback-резолверов из Rules, иначе
//!    UnresolvedService
//! 3. один кандидат -> берём его
//! 4. несколько unkeyed -> детерминированная политика из Rules
//! 5. проверка цикла по цепочке Request - fail fast
//! 6. рекурсивно строим выражения всех зависимостей (параметры
//!    конструктора, инъекции членов)
//! 7. оборачиваем подходящими декораторами (порядок регистрации,
//!    последний - самый внешний)
//! 8. оборачиваем reuse-логикой "создать-или-взять-из-scope"
//!
//! Результат - композитное выражение (Expr), интерпретируемое или
//! компилируемое в замыкания (см. compiled.rs). Выражение неизменяемо
//! после построения и кэшируется на (service_type, key, required_type).

use std::any::TypeId;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{DIError, DIResult};
use crate::factory::{
    ConstructorSpec, ConvertFn, DecorateFn, DefaultFn, DelegateFn, DisposerFn, Factory, FactoryId,
    FactoryKind, FinishFn, MemberSpec, ParamSpec,
};
use crate::key::{AnyArc, ServiceKey};
use crate::registry::{Registration, RegistryMap, RegistrySnapshot};
use crate::request::Request;
use crate::reuse::Reuse;
use crate::rules::{DisposableTransientPolicy, MultipleDefaultPolicy, Rules};

/// Композитное выражение "как построить значение".
#[derive(Clone)]
pub enum Expr {
    /// Готовое значение (instance регистрация).
    Constant(AnyArc),
    /// Вызов конструктора с рекурсивно построенными аргументами.
    Construct {
        type_name: &'static str,
        ctor: Arc<ConstructorSpec>,
        finish: FinishFn,
        args: Vec<Expr>,
        members: Vec<(MemberSpec, Expr)>,
    },
    /// Пользовательская delegate-фабрика.
    Delegate { func: DelegateFn },
    /// Декорирование внутреннего выражения.
    Decorate {
        inner: Box<Expr>,
        decorate: DecorateFn,
    },
    /// Создать-или-взять-из-scope (Singleton/Scoped/ScopedTo).
    Scoped {
        reuse: Reuse,
        factory_id: FactoryId,
        type_name: &'static str,
        disposer: Option<DisposerFn>,
        inner: Box<Expr>,
    },
    /// Transient с opt-in трекингом disposal в текущем scope.
    Tracked {
        type_name: &'static str,
        disposer: DisposerFn,
        inner: Box<Expr>,
    },
    /// Конвертация хранимого значения в другое представление сервиса.
    Convert {
        convert: ConvertFn,
        inner: Box<Expr>,
    },
    /// Значение по умолчанию опционального параметра.
    DefaultOf { produce: DefaultFn },
    /// Runtime-аргумент вызова resolve_with_args / Func.
    RuntimeArg { index: usize },
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(_) => f.write_str("Constant"),
            Expr::Construct {
                type_name, args, ..
            } => write!(f, "Construct({type_name}, args={})", args.len()),
            Expr::Delegate { .. } => f.write_str("Delegate"),
            Expr::Decorate { inner, .. } => write!(f, "Decorate({inner:?})"),
            Expr::Scoped { reuse, inner, .. } => write!(f, "Scoped({reuse}, {inner:?})"),
            Expr::Tracked { inner, .. } => write!(f, "Tracked({inner:?})"),
            Expr::Convert { inner, .. } => write!(f, "Convert({inner:?})"),
            Expr::DefaultOf { .. } => f.write_str("DefaultOf"),
            Expr::RuntimeArg { index } => write!(f, "RuntimeArg({index})"),
        }
    }
}

/// Типы runtime-аргументов, сопоставляемые параметрам по типу.
/// Каждый аргумент потребляется не более одного раза, позиционно.
pub(crate) struct ArgTypes {
    types: Vec<TypeId>,
    used: Vec<Cell<bool>>,
}

impl ArgTypes {
    pub(crate) fn new(args: &[AnyArc]) -> Self {
        Self {
            types: args.iter().map(|arg| (**arg).type_id()).collect(),
            used: args.iter().map(|_| Cell::new(false)).collect(),
        }
    }

    fn take(&self, type_id: TypeId) -> Option<usize> {
        self.types
            .iter()
            .enumerate()
            .find(|(index, ty)| **ty == type_id && !self.used[*index].get())
            .map(|(index, _)| {
                self.used[index].set(true);
                index
            })
    }

    fn contains(&self, type_id: TypeId) -> bool {
        self.types
            .iter()
            .enumerate()
            .any(|(index, ty)| *ty == type_id && !self.used[index].get())
    }
}

/// Построитель плана поверх одного снапшота реестра.
pub(crate) struct PlanBuilder<'a> {
    snapshot: &'a RegistrySnapshot,
    rules: &'a Rules,
    args: Option<&'a ArgTypes>,
}

impl<'a> PlanBuilder<'a> {
    pub(crate) fn new(
        snapshot: &'a RegistrySnapshot,
        rules: &'a Rules,
        args: Option<&'a ArgTypes>,
    ) -> Self {
        Self {
            snapshot,
            rules,
            args,
        }
    }

    /// Построить план для запроса сервиса.
    pub(crate) fn build(
        &self,
        service_type: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
        parent: Option<&Arc<Request>>,
    ) -> DIResult<Expr> {
        let probe = match parent {
            Some(parent) => parent.push(service_type, type_name, key.clone(), required_type),
            None => Request::root(service_type, type_name, key.clone(), required_type),
        };

        if probe.depth() > self.rules.max_resolution_depth {
            return Err(DIError::recursive(probe.chain()));
        }

        let lookup_type = required_type.unwrap_or(service_type);
        let candidates = self.candidates(lookup_type, &key, &probe);

        let registration = match candidates.len() {
            0 => match self.synthesize_unknown(&probe) {
                Some(factory) => {
                    debug!(type_name, "unknown-service resolver synthesized a factory");
                    Arc::new(Registration {
                        service_type,
                        type_name,
                        key: key.clone(),
                        factory: Arc::new(factory),
                        convert: None,
                        order: u64::MAX,
                    })
                }
                None => {
                    return Err(DIError::unresolved(type_name, key, probe.chain()));
                }
            },
            1 => Arc::clone(&candidates[0]),
            n => match self.rules.multiple_default_policy {
                MultipleDefaultPolicy::Error if key.is_none() => {
                    return Err(DIError::AmbiguousService {
                        type_name,
                        count: n,
                        chain: probe.chain(),
                    });
                }
                _ => {
                    // PreferLastRegistered: наибольший порядок вставки
                    let last = candidates
                        .iter()
                        .max_by_key(|entry| entry.order)
                        .expect("candidates are non-empty");
                    Arc::clone(last)
                }
            },
        };

        self.build_with_registration(&registration, &probe, parent)
    }

    /// Построить план для конкретной записи реестра (ResolveMany, Validate).
    pub(crate) fn build_for_registration(
        &self,
        registration: &Arc<Registration>,
        parent: Option<&Arc<Request>>,
    ) -> DIResult<Expr> {
        let probe = match parent {
            Some(parent) => parent.push(
                registration.service_type,
                registration.type_name,
                registration.key.clone(),
                None,
            ),
            None => Request::root(
                registration.service_type,
                registration.type_name,
                registration.key.clone(),
                None,
            ),
        };
        self.build_with_registration(registration, &probe, parent)
    }

    fn build_with_registration(
        &self,
        registration: &Arc<Registration>,
        probe: &Arc<Request>,
        parent: Option<&Arc<Request>>,
    ) -> DIResult<Expr> {
        let factory = &registration.factory;

        // Fail fast на логическом цикле: пара (тип, фабрика) уже в цепочке
        if let Some(parent) = parent {
            if parent.is_circular(registration.service_type, factory.id) {
                return Err(DIError::recursive(probe.chain()));
            }
        }

        let request = probe.with_factory(factory.id);
        if self.rules.verbose_resolution_logging {
            debug!(
                type_name = registration.type_name,
                factory_id = factory.id,
                reuse = %factory.reuse,
                "building plan node"
            );
        }

        let base = self.build_base(registration, factory, &request)?;
        let decorated = self.apply_decorators(registration, &request, base)?;
        let wrapped = self.apply_reuse(registration, factory, decorated)?;

        Ok(match &registration.convert {
            Some(convert) => Expr::Convert {
                convert: convert.clone(),
                inner: Box::new(wrapped),
            },
            None => wrapped,
        })
    }

    fn build_base(
        &self,
        registration: &Arc<Registration>,
        factory: &Arc<Factory>,
        request: &Arc<Request>,
    ) -> DIResult<Expr> {
        match &factory.kind {
            FactoryKind::Instance(instance) => Ok(Expr::Constant(instance.0.clone())),
            FactoryKind::Delegate(delegate) => Ok(Expr::Delegate {
                func: delegate.0.clone(),
            }),
            FactoryKind::Constructor(ctor_factory) => {
                let ctor = self.select_constructor(
                    registration.type_name,
                    &ctor_factory.constructors,
                    request,
                )?;

                let mut args = Vec::with_capacity(ctor.params.len());
                for param in &ctor.params {
                    args.push(self.build_param(param, request)?);
                }

                let mut members = Vec::with_capacity(ctor_factory.members.len());
                for member in &ctor_factory.members {
                    let expr = self.build(
                        member.type_id,
                        member.type_name,
                        member.key.clone(),
                        None,
                        Some(request),
                    )?;
                    members.push((member.clone(), expr));
                }

                Ok(Expr::Construct {
                    type_name: registration.type_name,
                    ctor,
                    finish: ctor_factory.finish.clone(),
                    args,
                    members,
                })
            }
            FactoryKind::Decorator(_) => Err(DIError::factory(
                "decorator cannot be resolved as a primary factory",
                registration.type_name,
            )),
        }
    }

    fn build_param(&self, param: &ParamSpec, request: &Arc<Request>) -> DIResult<Expr> {
        // Runtime-аргументы имеют приоритет над реестром
        if let Some(args) = self.args {
            if let Some(index) = args.take(param.type_id) {
                return Ok(Expr::RuntimeArg { index });
            }
        }

        match self.build(
            param.type_id,
            param.type_name,
            param.key.clone(),
            None,
            Some(request),
        ) {
            Ok(expr) => Ok(expr),
            Err(DIError::UnresolvedService { .. }) if param.default.is_some() => {
                Ok(Expr::DefaultOf {
                    produce: param.default.clone().expect("default checked above"),
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Выбор конструктора: единственный кандидат побеждает сразу; из
    /// нескольких остаются те, чьи параметры все разрешимы, tie-break -
    /// наибольшее число параметров; неоднозначность - ошибка.
    fn select_constructor(
        &self,
        type_name: &'static str,
        constructors: &[Arc<ConstructorSpec>],
        request: &Arc<Request>,
    ) -> DIResult<Arc<ConstructorSpec>> {
        match constructors.len() {
            0 => Err(DIError::constructor_selection(
                type_name,
                "no constructors declared",
                request.chain(),
            )),
            1 => Ok(Arc::clone(&constructors[0])),
            _ => {
                let mut eligible: Vec<&Arc<ConstructorSpec>> = constructors
                    .iter()
                    .filter(|ctor| {
                        ctor.params
                            .iter()
                            .all(|param| self.param_is_satisfiable(param))
                    })
                    .collect();

                if eligible.is_empty() {
                    return Err(DIError::constructor_selection(
                        type_name,
                        "no constructor has all parameters resolvable",
                        request.chain(),
                    ));
                }

                let max_params = eligible
                    .iter()
                    .map(|ctor| ctor.params.len())
                    .max()
                    .expect("eligible is non-empty");
                eligible.retain(|ctor| ctor.params.len() == max_params);

                if eligible.len() > 1 {
                    return Err(DIError::constructor_selection(
                        type_name,
                        format!(
                            "{} constructors with {} resolvable parameter(s) are ambiguous",
                            eligible.len(),
                            max_params
                        ),
                        request.chain(),
                    ));
                }

                Ok(Arc::clone(eligible[0]))
            }
        }
    }

    fn param_is_satisfiable(&self, param: &ParamSpec) -> bool {
        if param.default.is_some() {
            return true;
        }
        if let Some(args) = self.args {
            if args.contains(param.type_id) {
                return true;
            }
        }
        self.snapshot
            .get(&param.type_id)
            .map(|entries| {
                entries.iter().any(|entry| {
                    !entry.factory.is_decorator() && entry.key == param.key
                })
            })
            .unwrap_or(false)
    }

    /// Подходящие декораторы сервиса, в порядке регистрации:
    /// последний зарегистрированный оборачивает самым внешним.
    fn apply_decorators(
        &self,
        registration: &Arc<Registration>,
        request: &Arc<Request>,
        base: Expr,
    ) -> DIResult<Expr> {
        let mut decorators: Vec<&Arc<Registration>> = Vec::new();
        if let Some(entries) = self.snapshot.get(&registration.service_type) {
            for entry in entries {
                if entry.factory.is_decorator() && entry.factory.matches(request) {
                    decorators.push(entry);
                }
            }
        }
        decorators.sort_by_key(|entry| entry.order);

        let mut expr = base;
        for decorator in decorators {
            let FactoryKind::Decorator(decorator_factory) = &decorator.factory.kind else {
                continue;
            };
            if let Some(condition) = &decorator_factory.condition {
                if !condition(request) {
                    continue;
                }
            }
            expr = Expr::Decorate {
                inner: Box::new(expr),
                decorate: decorator_factory.decorate.clone(),
            };
        }
        Ok(expr)
    }

    fn apply_reuse(
        &self,
        registration: &Arc<Registration>,
        factory: &Arc<Factory>,
        inner: Expr,
    ) -> DIResult<Expr> {
        // Instance никогда не перестраивается: reuse-обёртка не нужна
        if matches!(factory.kind, FactoryKind::Instance(_)) {
            return Ok(inner);
        }

        let disposer = if factory.setup.prevent_disposal {
            None
        } else {
            factory.setup.disposer.clone()
        };

        match &factory.reuse {
            Reuse::Transient => match disposer {
                Some(disposer) if factory.setup.allow_disposable_transient => Ok(Expr::Tracked {
                    type_name: registration.type_name,
                    disposer,
                    inner: Box::new(inner),
                }),
                Some(_) => match self.rules.disposable_transient {
                    DisposableTransientPolicy::Ignore => Ok(inner),
                    DisposableTransientPolicy::Warn => {
                        warn!(
                            type_name = registration.type_name,
                            "⚠️ disposable service registered as Transient without tracking, instance will leak"
                        );
                        Ok(inner)
                    }
                    DisposableTransientPolicy::Error => Err(DIError::DisposableTransient {
                        type_name: registration.type_name,
                    }),
                },
                None => Ok(inner),
            },
            reuse => Ok(Expr::Scoped {
                reuse: reuse.clone(),
                factory_id: factory.id,
                type_name: registration.type_name,
                disposer,
                inner: Box::new(inner),
            }),
        }
    }

    fn candidates(
        &self,
        lookup_type: TypeId,
        key: &Option<ServiceKey>,
        probe: &Arc<Request>,
    ) -> Vec<Arc<Registration>> {
        RegistryMap::entries_of(self.snapshot, lookup_type)
            .into_iter()
            .filter(|entry| !entry.factory.is_decorator())
            .filter(|entry| entry.factory.matches(probe))
            .filter(|entry| match key {
                Some(key) => entry.key.as_ref() == Some(key),
                None => entry.key.is_none(),
            })
            .collect()
    }

    fn synthesize_unknown(&self, probe: &Arc<Request>) -> Option<Factory> {
        self.rules
            .unknown_service
            .iter()
            .find_map(|resolver| resolver(probe))
    }
}
