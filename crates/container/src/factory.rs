//! Модель фабрик: все способы произвести экземпляр сервиса.
//!
//! Фабрика - это tagged variant (sum type), а не иерархия классов:
//! plan builder диспетчеризует по вариантам через pattern match.
//!
//! - `Constructor` - построение через спецификации конструкторов
//!   (аналог reflection-конструирования: список параметров + invoke closure)
//! - `Delegate` - пользовательская фабричная функция с resolver context
//! - `Instance` - заранее построенное значение
//! - `Decorator` - оборачивает уже разрешённый экземпляр того же сервиса
//!
//! Каждая фабрика несёт уникальный числовой id (ключ кэша и scope),
//! свою политику reuse и setup-метаданные.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::container::ResolveContext;
use crate::errors::{DIError, DIResult};
use crate::key::{AnyArc, ServiceKey};
use crate::request::Request;
use crate::reuse::Reuse;

/// Уникальный идентификатор фабрики; ключ слотов scope и кэша планов.
pub type FactoryId = u64;

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_factory_id() -> FactoryId {
    NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Пользовательская delegate-фабрика: получает resolver context текущей резолюции.
pub type DelegateFn = Arc<dyn Fn(&ResolveContext) -> DIResult<AnyArc> + Send + Sync>;

/// Декорирование уже построенного экземпляра.
pub type DecorateFn = Arc<dyn Fn(&ResolveContext, AnyArc) -> DIResult<AnyArc> + Send + Sync>;

/// Условие применимости фабрики/декоратора к запросу.
pub type ConditionFn = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Disposer хук: как утилизировать хранимое значение.
pub type DisposerFn = Arc<dyn Fn(&AnyArc) -> anyhow::Result<()> + Send + Sync>;

/// Вызов конструктора: разрешённые аргументы -> сырое построенное значение.
pub type InvokeFn =
    Arc<dyn Fn(Vec<AnyArc>) -> DIResult<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Преобразование сырого построенного значения в хранимое представление.
pub type FinishFn =
    Arc<dyn Fn(Box<dyn Any + Send + Sync>) -> DIResult<AnyArc> + Send + Sync>;

/// Значение по умолчанию для опционального параметра.
pub type DefaultFn = Arc<dyn Fn() -> AnyArc + Send + Sync>;

/// Инъекция члена в сырое построенное значение (property/field injection).
pub type MemberInjectFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), AnyArc) -> DIResult<()> + Send + Sync>;

/// Конвертация хранимого значения в альтернативное представление сервиса
/// (используется register_many: один экземпляр под несколькими сервисами).
pub type ConvertFn = Arc<dyn Fn(AnyArc) -> DIResult<AnyArc> + Send + Sync>;

/// Утилизируемый сервис. Ошибки dispose агрегируются scope'ом, а не теряются.
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

// === DEPENDENCY MARKERS ===
// Типизированные маркеры зависимостей для спецификаций конструкторов.
// Inject<T> - конкретный тип, InjectDyn<S> - trait object.

/// Описание одной зависимости конструктора/члена.
pub trait Dependency: Send + Sync + 'static {
    /// Что получает closure конструктора после резолюции.
    type Value: Send + Sync + 'static;

    fn spec() -> ParamSpec;
    fn extract(value: AnyArc) -> DIResult<Self::Value>;
}

/// Зависимость от конкретного типа `T`, разрешается как `Arc<T>`.
pub struct Inject<T>(PhantomData<fn() -> T>);

impl<T: Send + Sync + 'static> Dependency for Inject<T> {
    type Value = Arc<T>;

    fn spec() -> ParamSpec {
        ParamSpec::of::<T>()
    }

    fn extract(value: AnyArc) -> DIResult<Self::Value> {
        value
            .downcast::<T>()
            .map_err(|_| DIError::mismatch(std::any::type_name::<T>(), "constructor argument"))
    }
}

/// Зависимость от trait object `S`, разрешается как `Arc<S>`.
pub struct InjectDyn<S: ?Sized>(PhantomData<fn() -> Box<S>>);

impl<S: ?Sized + Send + Sync + 'static> Dependency for InjectDyn<S> {
    type Value = Arc<S>;

    fn spec() -> ParamSpec {
        ParamSpec::of::<S>()
    }

    fn extract(value: AnyArc) -> DIResult<Self::Value> {
        let arc = value
            .downcast::<Arc<S>>()
            .map_err(|_| DIError::mismatch(std::any::type_name::<S>(), "constructor argument"))?;
        Ok((*arc).clone())
    }
}

/// Спецификация одного параметра конструктора.
#[derive(Clone)]
pub struct ParamSpec {
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Ключ регистрации, по которому резолвится параметр.
    pub key: Option<ServiceKey>,
    /// Значение по умолчанию: используется когда зависимость не разрешилась.
    pub default: Option<DefaultFn>,
}

impl ParamSpec {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key: None,
            default: None,
        }
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Спецификация конструктора: параметры + вызов.
///
/// Аналог выбранного reflection-конструктора: plan builder рекурсивно
/// резолвит каждый параметр и передаёт готовые значения в invoke.
#[derive(Clone)]
pub struct ConstructorSpec {
    pub params: Vec<ParamSpec>,
    pub invoke: InvokeFn,
}

impl fmt::Debug for ConstructorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorSpec")
            .field("params", &self.params)
            .finish()
    }
}

fn arg_count_error(expected: usize, got: usize) -> DIError {
    DIError::mismatch(
        "constructor argument pack",
        if expected > got {
            "fewer arguments than parameters"
        } else {
            "more arguments than parameters"
        },
    )
}

impl ConstructorSpec {
    fn from_parts(params: Vec<ParamSpec>, invoke: InvokeFn) -> Self {
        Self { params, invoke }
    }

    /// Конструктор конкретного типа без зависимостей.
    pub fn new0<T, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if !args.is_empty() {
                return Err(arg_count_error(0, args.len()));
            }
            Ok(Box::new(f()) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(Vec::new(), invoke)
    }

    /// Конструктор конкретного типа с одной зависимостью.
    pub fn new1<D1, T, F>(f: F) -> Self
    where
        D1: Dependency,
        T: Send + Sync + 'static,
        F: Fn(D1::Value) -> T + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 1 {
                return Err(arg_count_error(1, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec()], invoke)
    }

    /// Конструктор конкретного типа с двумя зависимостями.
    pub fn new2<D1, D2, T, F>(f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        T: Send + Sync + 'static,
        F: Fn(D1::Value, D2::Value) -> T + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 2 {
                return Err(arg_count_error(2, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            let b = D2::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a, b)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec(), D2::spec()], invoke)
    }

    /// Конструктор конкретного типа с тремя зависимостями.
    pub fn new3<D1, D2, D3, T, F>(f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        T: Send + Sync + 'static,
        F: Fn(D1::Value, D2::Value, D3::Value) -> T + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 3 {
                return Err(arg_count_error(3, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            let b = D2::extract(it.next().expect("arity checked"))?;
            let c = D3::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a, b, c)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec(), D2::spec(), D3::spec()], invoke)
    }

    /// Конструктор конкретного типа с четырьмя зависимостями.
    pub fn new4<D1, D2, D3, D4, T, F>(f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        D4: Dependency,
        T: Send + Sync + 'static,
        F: Fn(D1::Value, D2::Value, D3::Value, D4::Value) -> T + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 4 {
                return Err(arg_count_error(4, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            let b = D2::extract(it.next().expect("arity checked"))?;
            let c = D3::extract(it.next().expect("arity checked"))?;
            let d = D4::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a, b, c, d)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec(), D2::spec(), D3::spec(), D4::spec()], invoke)
    }

    /// Конструктор, производящий trait object `Arc<S>`, без зависимостей.
    pub fn produce0<S, F>(f: F) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if !args.is_empty() {
                return Err(arg_count_error(0, args.len()));
            }
            Ok(Box::new(f()) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(Vec::new(), invoke)
    }

    /// Конструктор, производящий trait object `Arc<S>`, с одной зависимостью.
    pub fn produce1<D1, S, F>(f: F) -> Self
    where
        D1: Dependency,
        S: ?Sized + Send + Sync + 'static,
        F: Fn(D1::Value) -> Arc<S> + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 1 {
                return Err(arg_count_error(1, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec()], invoke)
    }

    /// Конструктор, производящий trait object `Arc<S>`, с двумя зависимостями.
    pub fn produce2<D1, D2, S, F>(f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        S: ?Sized + Send + Sync + 'static,
        F: Fn(D1::Value, D2::Value) -> Arc<S> + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 2 {
                return Err(arg_count_error(2, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            let b = D2::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a, b)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec(), D2::spec()], invoke)
    }

    /// Конструктор, производящий trait object `Arc<S>`, с тремя зависимостями.
    pub fn produce3<D1, D2, D3, S, F>(f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        S: ?Sized + Send + Sync + 'static,
        F: Fn(D1::Value, D2::Value, D3::Value) -> Arc<S> + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(move |args: Vec<AnyArc>| {
            if args.len() != 3 {
                return Err(arg_count_error(3, args.len()));
            }
            let mut it = args.into_iter();
            let a = D1::extract(it.next().expect("arity checked"))?;
            let b = D2::extract(it.next().expect("arity checked"))?;
            let c = D3::extract(it.next().expect("arity checked"))?;
            Ok(Box::new(f(a, b, c)) as Box<dyn Any + Send + Sync>)
        });
        Self::from_parts(vec![D1::spec(), D2::spec(), D3::spec()], invoke)
    }
    /// Привязать ключ регистрации к первому параметру типа `P` без ключа.
    pub fn param_key<P: ?Sized + 'static>(mut self, key: impl Into<ServiceKey>) -> Self {
        let type_id = TypeId::of::<P>();
        if let Some(param) = self
            .params
            .iter_mut()
            .find(|p| p.type_id == type_id && p.key.is_none())
        {
            param.key = Some(key.into());
        }
        self
    }

    /// Значение по умолчанию для параметра типа `P`: используется, если
    /// зависимость не разрешилась (нет регистрации и нет fallback'а).
    pub fn param_default<P: Send + Sync + 'static>(
        mut self,
        default: impl Fn() -> P + Send + Sync + 'static,
    ) -> Self {
        let type_id = TypeId::of::<P>();
        if let Some(param) = self
            .params
            .iter_mut()
            .find(|p| p.type_id == type_id && p.default.is_none())
        {
            param.default = Some(Arc::new(move || Arc::new(default()) as AnyArc));
        }
        self
    }
}

/// Спецификация инъекции члена (setter injection).
#[derive(Clone)]
pub struct MemberSpec {
    pub name: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: Option<ServiceKey>,
    pub inject: MemberInjectFn,
}

impl MemberSpec {
    /// Setter-инъекция в конкретный тип `T`.
    pub fn setter<T, D, F>(name: &'static str, set: F) -> Self
    where
        T: Send + Sync + 'static,
        D: Dependency,
        F: Fn(&mut T, D::Value) + Send + Sync + 'static,
    {
        let spec = D::spec();
        let inject: MemberInjectFn = Arc::new(move |raw, value| {
            let target = raw
                .downcast_mut::<T>()
                .ok_or_else(|| DIError::mismatch(std::any::type_name::<T>(), "member injection"))?;
            set(target, D::extract(value)?);
            Ok(())
        });
        Self {
            name,
            type_id: spec.type_id,
            type_name: spec.type_name,
            key: None,
            inject,
        }
    }

    pub fn keyed(mut self, key: impl Into<ServiceKey>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl fmt::Debug for MemberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberSpec")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .finish()
    }
}

/// Constructor-фабрика: кандидаты-конструкторы + инъекции членов + finish.
#[derive(Clone)]
pub struct ConstructorFactory {
    pub impl_type_name: &'static str,
    pub constructors: Vec<Arc<ConstructorSpec>>,
    pub members: Vec<MemberSpec>,
    /// Сырое построенное значение -> хранимое представление
    /// (Arc<T> для конкретных сервисов, Arc<Arc<S>> для trait objects).
    pub finish: FinishFn,
}

impl fmt::Debug for ConstructorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorFactory")
            .field("impl_type_name", &self.impl_type_name)
            .field("constructors", &self.constructors.len())
            .field("members", &self.members.len())
            .finish()
    }
}

/// Finish closure для конкретного типа `T`.
pub(crate) fn finish_concrete<T: Send + Sync + 'static>() -> FinishFn {
    Arc::new(|raw| {
        let built = raw
            .downcast::<T>()
            .map_err(|_| DIError::mismatch(std::any::type_name::<T>(), "finish"))?;
        Ok(Arc::new(*built) as AnyArc)
    })
}

/// Finish closure для trait object `S` (сырое значение содержит `Arc<S>`).
pub(crate) fn finish_dyn<S: ?Sized + Send + Sync + 'static>() -> FinishFn {
    Arc::new(|raw| {
        let built = raw
            .downcast::<Arc<S>>()
            .map_err(|_| DIError::mismatch(std::any::type_name::<S>(), "finish"))?;
        Ok(Arc::new(*built) as AnyArc)
    })
}

/// Disposer для конкретного типа, реализующего [`Dispose`].
pub(crate) fn disposer_concrete<T: Dispose + 'static>() -> DisposerFn {
    Arc::new(|value| match value.downcast_ref::<T>() {
        Some(instance) => instance.dispose(),
        None => Ok(()),
    })
}

/// Disposer для trait object сервиса, реализующего [`Dispose`].
pub(crate) fn disposer_dyn<S: ?Sized + Dispose + Send + Sync + 'static>() -> DisposerFn {
    Arc::new(|value| match value.downcast_ref::<Arc<S>>() {
        Some(instance) => instance.dispose(),
        None => Ok(()),
    })
}

/// Типизированный набор конструкторов конкретного сервиса `T`.
///
/// Несколько конструкторов - это кандидаты для политики выбора
/// (единственный побеждает сразу, иначе выбирается разрешимый с
/// наибольшим числом параметров).
pub struct Constructors<T: Send + Sync + 'static> {
    pub(crate) specs: Vec<Arc<ConstructorSpec>>,
    pub(crate) members: Vec<MemberSpec>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Default for Constructors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Constructors<T> {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Добавить произвольную спецификацию (escape hatch для param_key и т.п.).
    pub fn with(mut self, spec: ConstructorSpec) -> Self {
        self.specs.push(Arc::new(spec));
        self
    }

    pub fn ctor0<F>(self, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::new0(f))
    }

    pub fn ctor1<D1, F>(self, f: F) -> Self
    where
        D1: Dependency,
        F: Fn(D1::Value) -> T + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::new1::<D1, T, F>(f))
    }

    pub fn ctor2<D1, D2, F>(self, f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        F: Fn(D1::Value, D2::Value) -> T + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::new2::<D1, D2, T, F>(f))
    }

    pub fn ctor3<D1, D2, D3, F>(self, f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        F: Fn(D1::Value, D2::Value, D3::Value) -> T + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::new3::<D1, D2, D3, T, F>(f))
    }

    pub fn ctor4<D1, D2, D3, D4, F>(self, f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        D4: Dependency,
        F: Fn(D1::Value, D2::Value, D3::Value, D4::Value) -> T + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::new4::<D1, D2, D3, D4, T, F>(f))
    }

    /// Setter-инъекция члена после конструирования.
    pub fn member<D, F>(mut self, name: &'static str, set: F) -> Self
    where
        D: Dependency,
        F: Fn(&mut T, D::Value) + Send + Sync + 'static,
    {
        self.members.push(MemberSpec::setter::<T, D, F>(name, set));
        self
    }

    pub(crate) fn into_factory_parts(self) -> (Vec<Arc<ConstructorSpec>>, Vec<MemberSpec>) {
        (self.specs, self.members)
    }
}

/// Типизированный набор конструкторов trait object сервиса `S`.
/// Конструкторы возвращают `Arc<S>`; инъекция членов для trait objects
/// не поддерживается - инжектируйте через конструктор.
pub struct DynConstructors<S: ?Sized + Send + Sync + 'static> {
    pub(crate) specs: Vec<Arc<ConstructorSpec>>,
    _marker: PhantomData<fn() -> Box<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Default for DynConstructors<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized + Send + Sync + 'static> DynConstructors<S> {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with(mut self, spec: ConstructorSpec) -> Self {
        self.specs.push(Arc::new(spec));
        self
    }

    pub fn ctor0<F>(self, f: F) -> Self
    where
        F: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::produce0::<S, F>(f))
    }

    pub fn ctor1<D1, F>(self, f: F) -> Self
    where
        D1: Dependency,
        F: Fn(D1::Value) -> Arc<S> + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::produce1::<D1, S, F>(f))
    }

    pub fn ctor2<D1, D2, F>(self, f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        F: Fn(D1::Value, D2::Value) -> Arc<S> + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::produce2::<D1, D2, S, F>(f))
    }

    pub fn ctor3<D1, D2, D3, F>(self, f: F) -> Self
    where
        D1: Dependency,
        D2: Dependency,
        D3: Dependency,
        F: Fn(D1::Value, D2::Value, D3::Value) -> Arc<S> + Send + Sync + 'static,
    {
        self.with(ConstructorSpec::produce3::<D1, D2, D3, S, F>(f))
    }
}

/// Декоратор: оборачивает базовый экземпляр того же сервиса.
#[derive(Clone)]
pub struct DecoratorFactory {
    pub decorate: DecorateFn,
    /// Условие применимости (например, равенство ключа запроса).
    pub condition: Option<ConditionFn>,
}

impl fmt::Debug for DecoratorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorFactory")
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

/// Setup-метаданные фабрики.
#[derive(Clone, Default)]
pub struct Setup {
    /// Условие применимости фабрики к запросу.
    pub condition: Option<ConditionFn>,
    /// Как утилизировать хранимое значение; None - не трекается.
    pub disposer: Option<DisposerFn>,
    /// Разрешить disposable transient без нарушения политики.
    pub allow_disposable_transient: bool,
    /// Не трекать disposal даже при наличии disposer (для instance регистраций).
    pub prevent_disposal: bool,
}

impl fmt::Debug for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("has_condition", &self.condition.is_some())
            .field("has_disposer", &self.disposer.is_some())
            .field(
                "allow_disposable_transient",
                &self.allow_disposable_transient,
            )
            .field("prevent_disposal", &self.prevent_disposal)
            .finish()
    }
}

/// Варианты фабрик.
#[derive(Debug, Clone)]
pub enum FactoryKind {
    Constructor(ConstructorFactory),
    Delegate(DebugDelegate),
    Instance(DebugInstance),
    Decorator(DecoratorFactory),
}

/// Обёртка delegate для Debug (closure не печатается).
#[derive(Clone)]
pub struct DebugDelegate(pub DelegateFn);

impl fmt::Debug for DebugDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Delegate(..)")
    }
}

/// Обёртка instance для Debug.
#[derive(Clone)]
pub struct DebugInstance(pub AnyArc);

impl fmt::Debug for DebugInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Instance(..)")
    }
}

/// Фабрика сервиса: уникальный id + reuse + setup + вариант.
#[derive(Debug, Clone)]
pub struct Factory {
    pub id: FactoryId,
    pub reuse: Reuse,
    pub setup: Setup,
    pub kind: FactoryKind,
}

impl Factory {
    pub fn new(reuse: Reuse, setup: Setup, kind: FactoryKind) -> Self {
        Self {
            id: next_factory_id(),
            reuse,
            setup,
            kind,
        }
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, FactoryKind::Decorator(_))
    }

    /// Применима ли фабрика к запросу (условие из setup).
    pub fn matches(&self, request: &Request) -> bool {
        match &self.setup.condition {
            Some(condition) => condition(request),
            None => true,
        }
    }
}
