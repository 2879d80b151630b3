//! Правила (политики) контейнера.
//!
//! Rules - неизменяемый конфигурационный объект: политика выбора фабрики
//! при неоднозначности, fallback-резолверы неизвестных сервисов, политика
//! disposable transient, порог компиляции планов. `Container::with_rules`
//! создаёт новый фасад с другими правилами поверх того же реестра -
//! правила никогда не мутируются на месте.

use std::fmt;
use std::sync::Arc;

use crate::factory::Factory;
use crate::request::Request;
use crate::reuse::Reuse;

/// Детерминированный выбор из нескольких unkeyed регистраций одного сервиса.
///
/// Это сознательно явный конфигурационный выбор: молчаливое угадывание
/// "лучшей" политики - самый частый класс интеграционных дефектов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultipleDefaultPolicy {
    /// Несколько кандидатов без ключа - ошибка AmbiguousService.
    #[default]
    Error,
    /// Выигрывает последняя зарегистрированная (наибольший порядок вставки).
    PreferLastRegistered,
}

/// Политика обращения с disposable transient без opt-in трекинга.
///
/// Transient экземпляр контейнер не кэширует и по умолчанию не утилизирует;
/// disposable transient без трекинга - это утечка ресурса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposableTransientPolicy {
    /// Предупреждение в лог при построении плана.
    #[default]
    Warn,
    /// Молча игнорировать (поведение legacy контейнеров).
    Ignore,
    /// Ошибка построения плана.
    Error,
}

/// Fallback-резолвер неизвестного сервиса: может синтезировать фабрику
/// для запроса, у которого нет регистраций.
pub type UnknownServiceFn = Arc<dyn Fn(&Request) -> Option<Factory> + Send + Sync>;

/// Неизменяемые правила резолюции.
#[derive(Clone)]
pub struct Rules {
    /// Reuse по умолчанию для регистраций без явной политики.
    pub default_reuse: Reuse,
    pub multiple_default_policy: MultipleDefaultPolicy,
    pub disposable_transient: DisposableTransientPolicy,
    /// Цепочка fallback-резолверов неизвестных сервисов (по порядку).
    pub unknown_service: Vec<UnknownServiceFn>,
    /// Сколько интерпретаций плана до компиляции в замыкания.
    /// 1 = компилировать со второго resolve (двухуровневая стратегия).
    pub compile_threshold: u32,
    /// Страховка от патологически глубоких графов.
    pub max_resolution_depth: usize,
    /// Подробное логирование пути резолюции (debug!).
    pub verbose_resolution_logging: bool,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            default_reuse: Reuse::Transient,
            multiple_default_policy: MultipleDefaultPolicy::default(),
            disposable_transient: DisposableTransientPolicy::default(),
            unknown_service: Vec::new(),
            compile_threshold: 1,
            max_resolution_depth: 256,
            verbose_resolution_logging: cfg!(debug_assertions),
        }
    }
}

impl Rules {
    /// Production конфигурация: без подробного логирования.
    pub fn production() -> Self {
        Self {
            verbose_resolution_logging: false,
            disposable_transient: DisposableTransientPolicy::Error,
            ..Self::default()
        }
    }

    /// Development конфигурация: подробное логирование, мягкие политики.
    pub fn development() -> Self {
        Self {
            verbose_resolution_logging: true,
            disposable_transient: DisposableTransientPolicy::Warn,
            ..Self::default()
        }
    }

    /// Minimal конфигурация для тестов: компиляция с первого же resolve.
    pub fn minimal() -> Self {
        Self {
            verbose_resolution_logging: false,
            compile_threshold: 0,
            ..Self::default()
        }
    }

    pub fn with_default_reuse(mut self, reuse: Reuse) -> Self {
        self.default_reuse = reuse;
        self
    }

    pub fn with_multiple_default_policy(mut self, policy: MultipleDefaultPolicy) -> Self {
        self.multiple_default_policy = policy;
        self
    }

    pub fn with_disposable_transient(mut self, policy: DisposableTransientPolicy) -> Self {
        self.disposable_transient = policy;
        self
    }

    /// Добавить fallback-резолвер в конец цепочки.
    pub fn with_unknown_service_resolver(mut self, resolver: UnknownServiceFn) -> Self {
        self.unknown_service.push(resolver);
        self
    }

    pub fn with_compile_threshold(mut self, threshold: u32) -> Self {
        self.compile_threshold = threshold;
        self
    }
}

impl fmt::Debug for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules")
            .field("default_reuse", &self.default_reuse)
            .field("multiple_default_policy", &self.multiple_default_policy)
            .field("disposable_transient", &self.disposable_transient)
            .field("unknown_service_resolvers", &self.unknown_service.len())
            .field("compile_threshold", &self.compile_threshold)
            .field("max_resolution_depth", &self.max_resolution_depth)
            .finish()
    }
}
