//! Resolution engine DI контейнера.
//!
//! Ядро: неизменяемый реестр регистраций с lock-free публикацией версий,
//! построитель планов резолюции (рекурсивный спуск с обнаружением циклов
//! и неоднозначностей), двухуровневый кэш скомпилированных фабрик
//! (интерпретация первого вызова, компиляция в замыкания на повторных)
//! и дерево scope'ов с протоколом владения/утилизации экземпляров.
//!
//! # Быстрый старт
//!
//! ```rust
//! use std::sync::Arc;
//! use container::{Constructors, Container, Inject, RegisterOptions, Reuse};
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//! container
//!     .register::<Database>(
//!         Constructors::new().ctor0(|| Database {
//!             url: "sqlite://memory".to_string(),
//!         }),
//!         RegisterOptions::new().reuse(Reuse::Singleton),
//!     )
//!     .unwrap();
//! container
//!     .register::<UserService>(
//!         Constructors::new().ctor1::<Inject<Database>, _>(|db| UserService { db }),
//!         RegisterOptions::new(),
//!     )
//!     .unwrap();
//!
//! let service = container.resolve::<UserService>().unwrap();
//! assert_eq!(service.db.url, "sqlite://memory");
//! ```
//!
//! Контейнер - пассивная библиотека: своих потоков нет, все операции
//! безопасны при параллельных вызовах. Ошибки резолюции несут полный
//! путь по графу зависимостей (`ServiceA -> ServiceB -> IServiceC`).

pub mod config;
pub mod container;
pub mod errors;
pub mod factory;
pub mod key;
pub mod registry;
pub mod request;
pub mod reuse;
pub mod rules;
pub mod scope;
pub mod stats;
pub mod traits;
pub mod wrappers;

mod compiled;
mod plan;

// Публичный API - re-exports основных типов
pub use config::RulesConfig;
pub use container::{
    Container, ContainerBuilder, RegisterOptions, ResolveContext, ScopeHandle, ServiceBinding,
};
pub use errors::{ChainSegment, DIContextExt, DIError, DIResult, ResolutionChain};
pub use factory::{
    ConstructorSpec, Constructors, Dependency, Dispose, DynConstructors, Factory, FactoryId,
    FactoryKind, Inject, InjectDyn, MemberSpec, ParamSpec, Setup,
};
pub use key::{AnyArc, ServiceId, ServiceKey};
pub use registry::{IfAlreadyRegistered, Registration, RegistryMap};
pub use request::Request;
pub use reuse::Reuse;
pub use rules::{DisposableTransientPolicy, MultipleDefaultPolicy, Rules, UnknownServiceFn};
pub use stats::ContainerStats;
pub use traits::ResolverDyn;
pub use wrappers::{arg, Func, Lazy, Many, ManyDyn};
