//! Ключи сервисов и type-erased представление экземпляров.
//!
//! Регистрация идентифицируется парой (TypeId сервиса, опциональный ServiceKey).
//! Несколько реализаций одного сервиса различаются ключами; отсутствие ключа -
//! это "default" регистрация.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Type-erased экземпляр сервиса, хранимый в scope и реестре.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Опциональный ключ регистрации сервиса.
///
/// Ключ обязан быть сравнимым и хэшируемым: он входит в ключ кэша планов
/// и в ключ уникальности реестра `(TypeId, ServiceKey)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    /// Именованный ключ: `"primary"`, `"fallback"` и т.п.
    Name(Cow<'static, str>),
    /// Числовой ключ для позиционных регистраций.
    Index(u64),
}

impl ServiceKey {
    /// Именованный ключ из статической строки без аллокации.
    pub fn name(name: &'static str) -> Self {
        ServiceKey::Name(Cow::Borrowed(name))
    }

    pub fn index(index: u64) -> Self {
        ServiceKey::Index(index)
    }
}

impl From<&'static str> for ServiceKey {
    fn from(name: &'static str) -> Self {
        ServiceKey::Name(Cow::Borrowed(name))
    }
}

impl From<String> for ServiceKey {
    fn from(name: String) -> Self {
        ServiceKey::Name(Cow::Owned(name))
    }
}

impl From<u64> for ServiceKey {
    fn from(index: u64) -> Self {
        ServiceKey::Index(index)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKey::Name(name) => write!(f, "\"{name}\""),
            ServiceKey::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// Идентичность запрашиваемого сервиса для диагностики.
#[derive(Debug, Clone)]
pub struct ServiceId {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: Option<ServiceKey>,
}

impl ServiceId {
    pub fn of<T: ?Sized + 'static>(key: Option<ServiceKey>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key,
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {{{key}}}", self.type_name),
            None => write!(f, "{}", self.type_name),
        }
    }
}
