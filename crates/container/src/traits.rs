//! Object-safe поверхность резолюции для dynamic dispatch.
//!
//! Generic методы (`resolve<T>`) не object-safe; адаптерам и
//! конфигурационным загрузчикам нужен `&dyn` интерфейс - для них
//! type-erased методы по TypeId.

use std::any::TypeId;

use crate::container::{Container, ScopeHandle};
use crate::errors::DIResult;
use crate::key::{AnyArc, ServiceKey};
use crate::registry::RegistryMap;

/// Type-erased резолвер: object-safe зеркало resolver-поверхности.
pub trait ResolverDyn: Send + Sync {
    /// Разрешить сервис по TypeId.
    fn resolve_type_erased(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
    ) -> DIResult<AnyArc>;

    /// Разрешить сервис, ища регистрацию по required type:
    /// ищется registration required_type, возвращается как type_id сервис.
    fn resolve_type_erased_as(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
    ) -> DIResult<AnyArc>;

    fn try_resolve_type_erased(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
    ) -> Option<AnyArc> {
        self.resolve_type_erased(type_id, type_name, key).ok()
    }

    /// Есть ли регистрация (без построения плана).
    fn can_resolve(&self, type_id: TypeId, key: Option<&ServiceKey>) -> bool;
}

impl ResolverDyn for Container {
    fn resolve_type_erased(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
    ) -> DIResult<AnyArc> {
        self.resolve_type_erased_as(type_id, type_name, key, None)
    }

    fn resolve_type_erased_as(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
    ) -> DIResult<AnyArc> {
        self.resolve_erased_in(
            self.root_scope(),
            type_id,
            type_name,
            key,
            required_type,
            None,
        )
    }

    fn can_resolve(&self, type_id: TypeId, key: Option<&ServiceKey>) -> bool {
        let snapshot = self.registry().snapshot();
        RegistryMap::entries_of(&snapshot, type_id)
            .iter()
            .any(|entry| !entry.factory.is_decorator() && entry.key.as_ref() == key)
    }
}

impl ResolverDyn for ScopeHandle {
    fn resolve_type_erased(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
    ) -> DIResult<AnyArc> {
        self.resolve_type_erased_as(type_id, type_name, key, None)
    }

    fn resolve_type_erased_as(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
    ) -> DIResult<AnyArc> {
        self.container().resolve_erased_in(
            self.scope_ref(),
            type_id,
            type_name,
            key,
            required_type,
            None,
        )
    }

    fn can_resolve(&self, type_id: TypeId, key: Option<&ServiceKey>) -> bool {
        self.container().can_resolve(type_id, key)
    }
}
