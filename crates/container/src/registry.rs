//! Персистентный реестр регистраций с lock-free публикацией версий.
//!
//! Реестр - это неизменяемая HAMT-карта `TypeId -> Vector<Registration>`
//! (im::HashMap со structural sharing), опубликованная через единственную
//! атомарную ссылку (arc-swap). Каждая мутация:
//! читаем текущий корень -> строим новую неизменяемую версию -> CAS-публикация;
//! при проигрыше CAS - retry (оптимистичная конкурентность, без глобального лока).
//!
//! ИНВАРИАНТЫ:
//! - lookup никогда не видит частично обновлённую структуру
//! - старые читатели продолжают видеть консистентный снапшот своей версии
//! - не более одной записи на пару (TypeId, ServiceKey), кроме явного
//!   AppendNotKeyed

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::errors::{DIError, DIResult};
use crate::factory::{ConvertFn, Factory};
use crate::key::ServiceKey;
use crate::reuse::Reuse;

/// Политика обработки конфликта регистраций.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfAlreadyRegistered {
    /// Добавить ещё одну unkeyed запись ("multiple implementations").
    /// Дубликат keyed записи при этой политике - всё равно конфликт.
    #[default]
    AppendNotKeyed,
    /// Оставить существующую запись, новая тихо игнорируется.
    Keep,
    /// Атомарно заменить существующую запись.
    Replace,
    /// Конфликт - ошибка регистрации.
    Throw,
}

/// Неизменяемая запись реестра.
#[derive(Clone)]
pub struct Registration {
    pub service_type: TypeId,
    pub type_name: &'static str,
    pub key: Option<ServiceKey>,
    pub factory: Arc<Factory>,
    /// Конвертация хранимого значения в представление этого сервиса
    /// (register_many: общий экземпляр под несколькими сервисами).
    pub convert: Option<ConvertFn>,
    /// Глобальный порядок вставки: детерминированный tie-break.
    pub order: u64,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("service_type", &self.service_type)
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .field("factory", &self.factory)
            .field("has_convert", &self.convert.is_some())
            .field("order", &self.order)
            .finish()
    }
}

impl Registration {
    pub fn reuse(&self) -> &Reuse {
        &self.factory.reuse
    }

    fn key_conflicts_with(&self, key: &Option<ServiceKey>) -> bool {
        self.key == *key
    }
}

type Entries = im::Vector<Arc<Registration>>;
type RegistryRoot = im::HashMap<TypeId, Entries>;

/// Снапшот реестра: lock-free, консистентный на момент загрузки.
pub type RegistrySnapshot = Arc<RegistryRoot>;

/// Реестр регистраций, версионируемый атомарной публикацией корня.
pub struct RegistryMap {
    root: ArcSwap<RegistryRoot>,
    /// Монотонное поколение: растёт на каждой публикации, инвалидирует кэш планов.
    generation: AtomicU64,
    next_order: AtomicU64,
}

impl Default for RegistryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryMap {
    pub fn new() -> Self {
        Self {
            root: ArcSwap::from_pointee(RegistryRoot::new()),
            generation: AtomicU64::new(0),
            next_order: AtomicU64::new(1),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn next_order(&self) -> u64 {
        self.next_order.fetch_add(1, Ordering::Relaxed)
    }

    /// Загрузить текущий снапшот. Никогда не блокирует писателей.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.root.load_full()
    }

    /// Зарегистрировать запись согласно политике конфликтов.
    ///
    /// Реализация: CAS-цикл поверх персистентной карты. Проигравший CAS
    /// пересчитывает новую версию от свежего корня и пробует снова.
    pub fn register(
        &self,
        registration: Registration,
        policy: IfAlreadyRegistered,
    ) -> DIResult<()> {
        let registration = Arc::new(registration);
        loop {
            let current = self.root.load();
            let type_id = registration.service_type;
            let existing = current.get(&type_id);

            // Декораторы не участвуют в конфликтaх ключей: они дополняют
            // базовую регистрацию, а не конкурируют с ней
            let conflict_index = existing.and_then(|entries| {
                entries.iter().position(|entry| {
                    !entry.factory.is_decorator()
                        && !registration.factory.is_decorator()
                        && entry.key_conflicts_with(&registration.key)
                })
            });

            let mut entries = existing.cloned().unwrap_or_default();
            match (conflict_index, policy) {
                (Some(_), IfAlreadyRegistered::Keep) => {
                    debug!(
                        type_name = registration.type_name,
                        "registration kept, entry already present"
                    );
                    return Ok(());
                }
                (Some(_), IfAlreadyRegistered::Throw) => {
                    warn!(
                        type_name = registration.type_name,
                        "❌ duplicate registration rejected by Throw policy"
                    );
                    return Err(DIError::registration(
                        match &registration.key {
                            Some(key) => format!("already registered with key {key}"),
                            None => "already registered".to_string(),
                        },
                        registration.type_name,
                    ));
                }
                (Some(index), IfAlreadyRegistered::Replace) => {
                    entries.set(index, Arc::clone(&registration));
                }
                (Some(_), IfAlreadyRegistered::AppendNotKeyed) => {
                    // Append разрешён только для unkeyed записей
                    if registration.key.is_some() {
                        return Err(DIError::registration(
                            format!(
                                "key {} is already taken, AppendNotKeyed only appends unkeyed entries",
                                registration.key.as_ref().expect("key checked above")
                            ),
                            registration.type_name,
                        ));
                    }
                    entries.push_back(Arc::clone(&registration));
                }
                (None, _) => {
                    entries.push_back(Arc::clone(&registration));
                }
            }

            let next = current.update(type_id, entries);
            let prev = self.root.compare_and_swap(&*current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &*current) {
                self.generation.fetch_add(1, Ordering::AcqRel);
                debug!(
                    type_name = registration.type_name,
                    reuse = %registration.reuse(),
                    "registered service"
                );
                return Ok(());
            }
            // CAS проиграл: другой писатель успел опубликовать версию
        }
    }

    /// Удалить запись (по типу и ключу). true если что-то удалено.
    pub fn remove(&self, service_type: TypeId, key: Option<&ServiceKey>) -> bool {
        loop {
            let current = self.root.load();
            let Some(entries) = current.get(&service_type) else {
                return false;
            };

            let mut next_entries = entries.clone();
            let before = next_entries.len();
            // Декораторы переживают удаление базовой регистрации
            next_entries
                .retain(|entry| entry.factory.is_decorator() || entry.key.as_ref() != key);
            if next_entries.len() == before {
                return false;
            }

            let next = if next_entries.is_empty() {
                current.without(&service_type)
            } else {
                current.update(service_type, next_entries)
            };

            let prev = self.root.compare_and_swap(&*current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &*current) {
                self.generation.fetch_add(1, Ordering::AcqRel);
                return true;
            }
        }
    }

    /// Все записи для типа (включая декораторы), в порядке вставки.
    pub fn entries_of(snapshot: &RegistrySnapshot, service_type: TypeId) -> Vec<Arc<Registration>> {
        snapshot
            .get(&service_type)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Количество зарегистрированных сервисных типов.
    pub fn service_count(&self) -> usize {
        self.root.load().len()
    }

    /// Количество записей всего (несколько реализаций считаются отдельно).
    pub fn registration_count(&self) -> usize {
        self.root.load().values().map(|entries| entries.len()).sum()
    }

    /// Список зарегистрированных сервисов для диагностики.
    pub fn registered_services(&self) -> Vec<(&'static str, Option<ServiceKey>, Reuse)> {
        let snapshot = self.root.load();
        let mut services: Vec<_> = snapshot
            .values()
            .flat_map(|entries| entries.iter())
            .map(|entry| {
                (
                    entry.type_name,
                    entry.key.clone(),
                    entry.factory.reuse.clone(),
                )
            })
            .collect();
        services.sort_by_key(|(name, _, _)| *name);
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{DebugInstance, FactoryKind, Setup};
    use crate::key::AnyArc;

    struct ServiceA;

    fn instance_registration(registry: &RegistryMap, key: Option<ServiceKey>) -> Registration {
        let factory = Factory::new(
            Reuse::Singleton,
            Setup::default(),
            FactoryKind::Instance(DebugInstance(Arc::new(ServiceA) as AnyArc)),
        );
        Registration {
            service_type: TypeId::of::<ServiceA>(),
            type_name: std::any::type_name::<ServiceA>(),
            key,
            factory: Arc::new(factory),
            convert: None,
            order: registry.next_order(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = RegistryMap::new();
        let registration = instance_registration(&registry, None);
        registry
            .register(registration, IfAlreadyRegistered::AppendNotKeyed)
            .expect("register");

        let snapshot = registry.snapshot();
        let entries = RegistryMap::entries_of(&snapshot, TypeId::of::<ServiceA>());
        assert_eq!(entries.len(), 1);
        assert_eq!(registry.registration_count(), 1);
    }

    #[test]
    fn test_throw_policy_rejects_duplicate() {
        let registry = RegistryMap::new();
        registry
            .register(
                instance_registration(&registry, None),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("first");

        let result = registry.register(
            instance_registration(&registry, None),
            IfAlreadyRegistered::Throw,
        );
        assert!(matches!(result, Err(DIError::Registration { .. })));
    }

    #[test]
    fn test_keep_policy_is_noop() {
        let registry = RegistryMap::new();
        let first = instance_registration(&registry, None);
        let first_order = first.order;
        registry
            .register(first, IfAlreadyRegistered::AppendNotKeyed)
            .expect("first");

        registry
            .register(
                instance_registration(&registry, None),
                IfAlreadyRegistered::Keep,
            )
            .expect("keep is a no-op");

        let snapshot = registry.snapshot();
        let entries = RegistryMap::entries_of(&snapshot, TypeId::of::<ServiceA>());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order, first_order);
    }

    #[test]
    fn test_replace_policy_swaps_entry() {
        let registry = RegistryMap::new();
        registry
            .register(
                instance_registration(&registry, None),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("first");

        let replacement = instance_registration(&registry, None);
        let replacement_order = replacement.order;
        registry
            .register(replacement, IfAlreadyRegistered::Replace)
            .expect("replace");

        let snapshot = registry.snapshot();
        let entries = RegistryMap::entries_of(&snapshot, TypeId::of::<ServiceA>());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order, replacement_order);
    }

    #[test]
    fn test_append_not_keyed_allows_multiple() {
        let registry = RegistryMap::new();
        for _ in 0..3 {
            registry
                .register(
                    instance_registration(&registry, None),
                    IfAlreadyRegistered::AppendNotKeyed,
                )
                .expect("append");
        }
        assert_eq!(registry.registration_count(), 3);
    }

    #[test]
    fn test_append_not_keyed_rejects_duplicate_key() {
        let registry = RegistryMap::new();
        registry
            .register(
                instance_registration(&registry, Some(ServiceKey::from("a"))),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("first keyed");

        let result = registry.register(
            instance_registration(&registry, Some(ServiceKey::from("a"))),
            IfAlreadyRegistered::AppendNotKeyed,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_old_snapshot_is_stable() {
        let registry = RegistryMap::new();
        registry
            .register(
                instance_registration(&registry, None),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("first");

        let old_snapshot = registry.snapshot();
        registry
            .register(
                instance_registration(&registry, Some(ServiceKey::from("b"))),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("second");

        // Старый снапшот не видит новую запись
        let old_entries = RegistryMap::entries_of(&old_snapshot, TypeId::of::<ServiceA>());
        assert_eq!(old_entries.len(), 1);
        let new_entries = RegistryMap::entries_of(&registry.snapshot(), TypeId::of::<ServiceA>());
        assert_eq!(new_entries.len(), 2);
    }

    #[test]
    fn test_generation_bumps_on_mutation() {
        let registry = RegistryMap::new();
        let g0 = registry.generation();
        registry
            .register(
                instance_registration(&registry, None),
                IfAlreadyRegistered::AppendNotKeyed,
            )
            .expect("register");
        assert!(registry.generation() > g0);

        let g1 = registry.generation();
        assert!(registry.remove(TypeId::of::<ServiceA>(), None));
        assert!(registry.generation() > g1);
    }

    #[test]
    fn test_concurrent_registration_all_land() {
        struct Slot<const N: usize>;

        let registry = Arc::new(RegistryMap::new());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u64 {
                    let factory = Factory::new(
                        Reuse::Transient,
                        Setup::default(),
                        FactoryKind::Instance(DebugInstance(Arc::new(()) as AnyArc)),
                    );
                    let registration = Registration {
                        service_type: TypeId::of::<Slot<0>>(),
                        type_name: "race_slot",
                        key: Some(ServiceKey::from(t * 1000 + i)),
                        factory: Arc::new(factory),
                        convert: None,
                        order: registry.next_order(),
                    };
                    registry
                        .register(registration, IfAlreadyRegistered::AppendNotKeyed)
                        .expect("concurrent register");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread join");
        }
        assert_eq!(registry.registration_count(), 8 * 50);
    }
}
