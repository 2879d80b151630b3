//! Политики повторного использования (lifetime) экземпляров.
//!
//! Reuse определяет сколько экземпляров производит фабрика и кто владеет
//! их временем жизни:
//! - [`Reuse::Transient`] - новый экземпляр на каждый resolve
//! - [`Reuse::Singleton`] - один экземпляр на весь контейнер (root scope)
//! - [`Reuse::Scoped`] - один экземпляр на ближайший открытый scope
//! - [`Reuse::ScopedTo`] - один экземпляр на ближайший scope с заданным именем

use std::borrow::Cow;
use std::fmt;

/// Стратегия управления жизненным циклом объектов
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reuse {
    /// Новый экземпляр при каждом запросе
    Transient,
    /// Один экземпляр для всего контейнера, хранится в root scope
    Singleton,
    /// Один экземпляр в рамках текущего (самого вложенного) открытого scope
    Scoped,
    /// Один экземпляр в рамках ближайшего scope с указанным именем
    ScopedTo(Cow<'static, str>),
}

impl Reuse {
    /// Scoped reuse, привязанный к именованному scope (например "web-request").
    pub fn scoped_to(name: &'static str) -> Self {
        Reuse::ScopedTo(Cow::Borrowed(name))
    }

    /// Кэшируется ли экземпляр (всё кроме Transient).
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, Reuse::Transient)
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Reuse::Singleton)
    }

    /// Требует ли данный reuse открытого scope во время resolve.
    #[inline]
    pub fn requires_open_scope(&self) -> bool {
        matches!(self, Reuse::Scoped | Reuse::ScopedTo(_))
    }
}

impl Default for Reuse {
    fn default() -> Self {
        Reuse::Transient
    }
}

impl fmt::Display for Reuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reuse::Transient => write!(f, "Transient"),
            Reuse::Singleton => write!(f, "Singleton"),
            Reuse::Scoped => write!(f, "Scoped"),
            Reuse::ScopedTo(name) => write!(f, "ScopedTo(\"{name}\")"),
        }
    }
}
