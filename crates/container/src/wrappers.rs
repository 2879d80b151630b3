//! Wrapper-резолюции: меняют форму результата, не декорируя поведение.
//!
//! - [`Lazy<T>`] - отложенная one-shot резолюция с захватом контекста
//! - [`Func<T>`] - замыкание-фабрика, резолвит при каждом вызове,
//!   опционально с runtime-аргументами
//! - [`Many<T>`] / [`ManyDyn<S>`] - ленивое перечисление ВСЕХ регистраций
//!   сервиса (keyed и unkeyed), каждый элемент строится по требованию
//!   из снапшота реестра, снятого при создании итератора

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::compiled::CompiledFactory;
use crate::container::{downcast_concrete, downcast_dyn, Container, ResolveContext};
use crate::errors::DIResult;
use crate::key::{AnyArc, ServiceKey};
use crate::plan::PlanBuilder;
use crate::registry::{Registration, RegistryMap, RegistrySnapshot};
use crate::scope::Scope;

/// Runtime-аргумент для [`Func::call_with`] / `resolve_with_args`.
pub fn arg<A: Send + Sync + 'static>(value: A) -> AnyArc {
    Arc::new(value)
}

/// Отложенная резолюция: сервис строится при первом `get()`,
/// дальнейшие вызовы возвращают тот же экземпляр.
pub struct Lazy<T: Send + Sync + 'static> {
    ctx: ResolveContext,
    key: Option<ServiceKey>,
    cell: OnceCell<Arc<T>>,
}

impl<T: Send + Sync + 'static> Lazy<T> {
    pub(crate) fn new(ctx: ResolveContext, key: Option<ServiceKey>) -> Self {
        Self {
            ctx,
            key,
            cell: OnceCell::new(),
        }
    }

    /// Привязать ключ регистрации (до первого `get()`).
    pub fn keyed(mut self, key: impl Into<ServiceKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn get(&self) -> DIResult<Arc<T>> {
        self.cell
            .get_or_try_init(|| match &self.key {
                Some(key) => self.ctx.resolve_keyed::<T>(key.clone()),
                None => self.ctx.resolve::<T>(),
            })
            .cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Замыкание-фабрика: каждый вызов - новая резолюция (reuse сервиса
/// при этом уважается: singleton остаётся singleton'ом).
pub struct Func<T: Send + Sync + 'static> {
    container: Container,
    scope: Arc<Scope>,
    key: Option<ServiceKey>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Func<T> {
    pub(crate) fn new(container: Container, scope: Arc<Scope>, key: Option<ServiceKey>) -> Self {
        Self {
            container,
            scope,
            key,
            _marker: PhantomData,
        }
    }

    pub fn keyed(mut self, key: impl Into<ServiceKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn call(&self) -> DIResult<Arc<T>> {
        self.container.resolve_in::<T>(&self.scope, self.key.clone())
    }

    /// Вызов с runtime-аргументами: сопоставляются по типу параметрам
    /// конструктора, которые иначе не разрешаются из реестра.
    pub fn call_with(&self, args: Vec<AnyArc>) -> DIResult<Arc<T>> {
        let value = self.container.resolve_erased_in(
            &self.scope,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            self.key.clone(),
            None,
            Some(args),
        )?;
        downcast_concrete::<T>(value)
    }
}

fn base_registrations(snapshot: &RegistrySnapshot, service_type: TypeId) -> Vec<Arc<Registration>> {
    let mut registrations: Vec<_> = RegistryMap::entries_of(snapshot, service_type)
        .into_iter()
        .filter(|entry| !entry.factory.is_decorator())
        .collect();
    registrations.sort_by_key(|entry| entry.order);
    registrations
}

fn build_one(
    container: &Container,
    scope: &Arc<Scope>,
    snapshot: &RegistrySnapshot,
    registration: &Arc<Registration>,
) -> DIResult<AnyArc> {
    let builder = PlanBuilder::new(snapshot, container.rules(), None);
    let expr = builder.build_for_registration(registration, None)?;
    let compiled = CompiledFactory::new(expr);
    let ctx = ResolveContext::new(container.clone(), Arc::clone(scope), None);
    compiled.execute(&ctx, container.rules().compile_threshold)
}

/// Ленивое перечисление всех регистраций конкретного сервиса `T`.
///
/// Элементы строятся только при итерации; итератор перезапускаем
/// через [`Many::restart`].
pub struct Many<T: Send + Sync + 'static> {
    container: Container,
    scope: Arc<Scope>,
    snapshot: RegistrySnapshot,
    registrations: Vec<Arc<Registration>>,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Many<T> {
    pub(crate) fn new(container: Container, scope: Arc<Scope>) -> Self {
        let snapshot = container.registry().snapshot();
        let registrations = base_registrations(&snapshot, TypeId::of::<T>());
        Self {
            container,
            scope,
            snapshot,
            registrations,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Сколько регистраций будет перечислено (без их построения).
    pub fn remaining(&self) -> usize {
        self.registrations.len().saturating_sub(self.index)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Начать перечисление заново (тот же снапшот реестра).
    pub fn restart(&mut self) {
        self.index = 0;
    }
}

impl<T: Send + Sync + 'static> Iterator for Many<T> {
    type Item = DIResult<Arc<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let registration = self.registrations.get(self.index)?.clone();
        self.index += 1;
        Some(
            build_one(&self.container, &self.scope, &self.snapshot, &registration)
                .and_then(downcast_concrete::<T>),
        )
    }
}

/// Ленивое перечисление всех регистраций trait object сервиса `S`.
pub struct ManyDyn<S: ?Sized + Send + Sync + 'static> {
    container: Container,
    scope: Arc<Scope>,
    snapshot: RegistrySnapshot,
    registrations: Vec<Arc<Registration>>,
    index: usize,
    _marker: PhantomData<fn() -> Box<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> ManyDyn<S> {
    pub(crate) fn new(container: Container, scope: Arc<Scope>) -> Self {
        let snapshot = container.registry().snapshot();
        let registrations = base_registrations(&snapshot, TypeId::of::<S>());
        Self {
            container,
            scope,
            snapshot,
            registrations,
            index: 0,
            _marker: PhantomData,
        }
    }

    pub fn remaining(&self) -> usize {
        self.registrations.len().saturating_sub(self.index)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn restart(&mut self) {
        self.index = 0;
    }
}

impl<S: ?Sized + Send + Sync + 'static> Iterator for ManyDyn<S> {
    type Item = DIResult<Arc<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        let registration = self.registrations.get(self.index)?.clone();
        self.index += 1;
        Some(
            build_one(&self.container, &self.scope, &self.snapshot, &registration)
                .and_then(downcast_dyn::<S>),
        )
    }
}
