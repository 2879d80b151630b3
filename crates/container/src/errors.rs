//! DI ERROR HANDLING SYSTEM
//!
//! Unified error handling для всего кода контейнера.
//!
//! # АРХИТЕКТУРА ОШИБОК
//!
//! - **DIError**: main error enum для всех операций контейнера
//! - **ResolutionChain**: цепочка запроса, рендерится в каждой ошибке резолюции
//!   как человекочитаемый путь `ServiceA -> ServiceB -> IServiceC`
//!
//! Ошибки построения плана - это synchronous failures в точке `resolve`/`validate`;
//! каждая несёт полную цепочку запроса. Ни одна ошибка не проглатывается молча,
//! кроме явного `try_resolve` пути.
//!
//! Все error types имеют conversions в anyhow::Error для backward compatibility.

use anyhow::Context;
use std::fmt;
use thiserror::Error;

use crate::key::ServiceKey;

/// Один сегмент цепочки резолюции: сервис и его ключ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    pub type_name: &'static str,
    pub key: Option<ServiceKey>,
}

impl fmt::Display for ChainSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {{{key}}}", self.type_name),
            None => write!(f, "{}", self.type_name),
        }
    }
}

/// Цепочка запроса, от корневого resolve к текущему сервису.
///
/// Основной механизм самоописания ошибок: вместо generic сообщений каждая
/// ошибка резолюции несёт путь по графу зависимостей.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionChain {
    segments: Vec<ChainSegment>,
}

impl ResolutionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, type_name: &'static str, key: Option<ServiceKey>) {
        self.segments.push(ChainSegment { type_name, key });
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[ChainSegment] {
        &self.segments
    }
}

impl fmt::Display for ResolutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Основной error type для всех операций контейнера
///
/// Structured error handling вместо .unwrap() паттернов: каждый вариант несёт
/// rich context, ошибки резолюции дополнительно несут цепочку запроса.
#[derive(Debug, Error, Clone)]
pub enum DIError {
    /// Конфликт регистрации (политика Throw, дубликат ключа и т.п.)
    #[error("Registration rejected for {type_name}: {message}")]
    Registration {
        message: String,
        type_name: &'static str,
    },

    /// Нет регистрации и ни один fallback resolver не дал фабрику
    #[error("No registration found for {type_name} (resolution path: {chain})")]
    UnresolvedService {
        type_name: &'static str,
        key: Option<ServiceKey>,
        chain: ResolutionChain,
    },

    /// Несколько unkeyed регистраций при политике Error
    #[error("{count} default registrations found for {type_name}, selection policy is Error (resolution path: {chain})")]
    AmbiguousService {
        type_name: &'static str,
        count: usize,
        chain: ResolutionChain,
    },

    /// Ноль или несколько подходящих конструкторов
    #[error("Constructor selection failed for {type_name}: {reason} (resolution path: {chain})")]
    ConstructorSelection {
        type_name: &'static str,
        reason: String,
        chain: ResolutionChain,
    },

    /// Циклическая зависимость, обнаруженная при построении плана
    #[error("Recursive dependency detected: {chain}")]
    RecursiveDependency { chain: ResolutionChain },

    /// Scoped сервис запрошен без подходящего открытого scope
    #[error("No matching open scope for scoped service {type_name} (wanted: {wanted}, resolution path: {chain})", wanted = .scope_name.as_deref().unwrap_or("current"))]
    NoCurrentScope {
        type_name: &'static str,
        scope_name: Option<String>,
        chain: ResolutionChain,
    },

    /// Операция после dispose контейнера или root scope
    #[error("Container is disposed, operation '{operation}' rejected")]
    ContainerDisposed { operation: &'static str },

    /// Disposable transient без opt-in трекинга (политика Error)
    #[error("Disposable service {type_name} registered as Transient without disposal tracking")]
    DisposableTransient { type_name: &'static str },

    /// Scope закрывается при живых дочерних scope
    #[error("Scope '{scope}' still has {open_children} open child scope(s), dispose children first")]
    ScopeHasOpenChildren { scope: String, open_children: usize },

    /// Агрегированные ошибки disposer'ов при закрытии scope
    #[error("Scope '{scope}' disposal finished with {} failure(s): {}", .failures.len(), .failures.join("; "))]
    ScopeDispose {
        scope: String,
        failures: Vec<String>,
    },

    /// Нарушение внутреннего инварианта downcast'а
    #[error("Type mismatch in {context}: expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        context: &'static str,
    },

    /// Ошибки конфигурации правил контейнера
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Ошибка пользовательской фабрики (delegate/constructor)
    #[error("Factory for {type_name} failed: {message}")]
    Factory {
        message: String,
        type_name: &'static str,
    },
}

pub type DIResult<T> = Result<T, DIError>;

impl DIError {
    pub fn unresolved(
        type_name: &'static str,
        key: Option<ServiceKey>,
        chain: ResolutionChain,
    ) -> Self {
        DIError::UnresolvedService {
            type_name,
            key,
            chain,
        }
    }

    pub fn recursive(chain: ResolutionChain) -> Self {
        DIError::RecursiveDependency { chain }
    }

    pub fn no_scope(
        type_name: &'static str,
        scope_name: Option<String>,
        chain: ResolutionChain,
    ) -> Self {
        DIError::NoCurrentScope {
            type_name,
            scope_name,
            chain,
        }
    }

    pub fn registration(message: impl Into<String>, type_name: &'static str) -> Self {
        DIError::Registration {
            message: message.into(),
            type_name,
        }
    }

    pub fn constructor_selection(
        type_name: &'static str,
        reason: impl Into<String>,
        chain: ResolutionChain,
    ) -> Self {
        DIError::ConstructorSelection {
            type_name,
            reason: reason.into(),
            chain,
        }
    }

    pub fn mismatch(expected: &'static str, context: &'static str) -> Self {
        DIError::TypeMismatch { expected, context }
    }

    pub fn configuration(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        DIError::Configuration {
            message: message.into(),
            field: field.map(|f| f.into()),
        }
    }

    pub fn factory(message: impl Into<String>, type_name: &'static str) -> Self {
        DIError::Factory {
            message: message.into(),
            type_name,
        }
    }

    /// Цепочка резолюции, если ошибка её несёт.
    pub fn chain(&self) -> Option<&ResolutionChain> {
        match self {
            DIError::UnresolvedService { chain, .. }
            | DIError::AmbiguousService { chain, .. }
            | DIError::ConstructorSelection { chain, .. }
            | DIError::RecursiveDependency { chain }
            | DIError::NoCurrentScope { chain, .. } => Some(chain),
            _ => None,
        }
    }

    /// Получить категорию ошибки для monitoring/alerting
    pub fn category(&self) -> &'static str {
        match self {
            DIError::Registration { .. } => "registration",
            DIError::UnresolvedService { .. } => "unresolved",
            DIError::AmbiguousService { .. } => "ambiguous",
            DIError::ConstructorSelection { .. } => "constructor",
            DIError::RecursiveDependency { .. } => "cycle",
            DIError::NoCurrentScope { .. } => "scope",
            DIError::ContainerDisposed { .. } => "disposed",
            DIError::DisposableTransient { .. } => "disposal",
            DIError::ScopeHasOpenChildren { .. } => "disposal",
            DIError::ScopeDispose { .. } => "disposal",
            DIError::TypeMismatch { .. } => "internal",
            DIError::Configuration { .. } => "configuration",
            DIError::Factory { .. } => "factory",
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Дефекты графа зависимостей требуют изменения кода
            DIError::UnresolvedService { .. }
            | DIError::AmbiguousService { .. }
            | DIError::ConstructorSelection { .. }
            | DIError::RecursiveDependency { .. }
            | DIError::Registration { .. }
            | DIError::Configuration { .. }
            | DIError::TypeMismatch { .. } => false,
            // Scope можно открыть и повторить
            DIError::NoCurrentScope { .. } => true,
            DIError::ContainerDisposed { .. } => false,
            DIError::DisposableTransient { .. } => false,
            DIError::ScopeHasOpenChildren { .. } => true,
            DIError::ScopeDispose { .. } => false,
            DIError::Factory { .. } => true,
        }
    }
}

/// Helper trait для добавления DI context к anyhow errors
pub trait DIContextExt<T> {
    fn di_context(self, message: &str) -> anyhow::Result<T>;
    fn di_with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> DIContextExt<T> for Result<T, DIError> {
    fn di_context(self, message: &str) -> anyhow::Result<T> {
        self.map_err(anyhow::Error::from)
            .with_context(|| message.to_string())
    }

    fn di_with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(anyhow::Error::from).with_context(f)
    }
}
