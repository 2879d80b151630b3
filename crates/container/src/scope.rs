//! Scope: дерево вложенных областей жизни экземпляров.
//!
//! Scope владеет экземплярами, которые он лениво создал (Scoped reuse);
//! singleton экземпляры принадлежат выделенному root scope, живущему
//! столько же, сколько контейнер.
//!
//! ПРОТОКОЛ DISPOSAL:
//! - каждый scope утилизирует свои disposable экземпляры в обратном
//!   порядке создания (LIFO)
//! - закрытие scope с живыми дочерними scope - громкая ошибка
//!   (ScopeHasOpenChildren), автоматический каскад сознательно отвергнут:
//!   молчаливое двойное управление временем жизни - именно тот класс
//!   ошибок, от которого защищает контейнер
//! - ошибки disposer'ов агрегируются, оставшиеся disposal всё равно
//!   выполняются
//! - конкурентные close() одного scope не утилизируют экземпляр дважды
//!
//! Слот экземпляра - OnceCell: at-most-once создание на (factory_id, scope)
//! даже при конкурентных resolve; проигравший поток дожидается результата
//! победителя.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::errors::{DIError, DIResult, ResolutionChain};
use crate::factory::{DisposerFn, FactoryId};
use crate::key::AnyArc;

/// Слот лениво создаваемого экземпляра.
struct InstanceSlot {
    cell: OnceCell<AnyArc>,
}

impl InstanceSlot {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

/// Отложенная утилизация одного экземпляра.
struct DisposalEntry {
    type_name: &'static str,
    value: AnyArc,
    disposer: DisposerFn,
}

/// Узел дерева scope.
pub struct Scope {
    name: Option<String>,
    /// Обратная ссылка на родителя: scope не владеет временем жизни родителя
    /// сверх самой цепочки.
    parent: Option<Arc<Scope>>,
    slots: Mutex<HashMap<FactoryId, Arc<InstanceSlot>>>,
    disposers: Mutex<Vec<DisposalEntry>>,
    disposed: AtomicBool,
    open_children: AtomicUsize,
}

impl Scope {
    /// Root scope контейнера (хранилище singleton'ов).
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self {
            name: None,
            parent: None,
            slots: Mutex::new(HashMap::new()),
            disposers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            open_children: AtomicUsize::new(0),
        })
    }

    /// Открыть дочерний scope.
    pub(crate) fn child(self: &Arc<Self>, name: Option<String>) -> Arc<Self> {
        self.open_children.fetch_add(1, Ordering::AcqRel);
        debug!(name = name.as_deref().unwrap_or("<anonymous>"), "scope opened");
        Arc::new(Self {
            name,
            parent: Some(Arc::clone(self)),
            slots: Mutex::new(HashMap::new()),
            disposers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            open_children: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Ближайший scope (включая текущий) с заданным именем.
    pub(crate) fn find_named(self: &Arc<Self>, name: &str) -> Option<Arc<Scope>> {
        let mut current = Arc::clone(self);
        loop {
            if current.name.as_deref() == Some(name) {
                return Some(current);
            }
            let parent = current.parent.as_ref().map(Arc::clone);
            match parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// Количество созданных экземпляров (для статистики).
    pub(crate) fn instance_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn label(&self) -> String {
        match (&self.name, self.is_root()) {
            (Some(name), _) => name.clone(),
            (None, true) => "<root>".to_string(),
            (None, false) => "<anonymous>".to_string(),
        }
    }

    fn alive_or_error(&self, type_name: &'static str) -> DIResult<()> {
        if !self.is_disposed() {
            return Ok(());
        }
        if self.is_root() {
            Err(DIError::ContainerDisposed {
                operation: "resolve",
            })
        } else {
            let mut chain = ResolutionChain::new();
            chain.push(type_name, None);
            Err(DIError::no_scope(type_name, self.name.clone(), chain))
        }
    }

    /// Получить или создать экземпляр фабрики в этом scope.
    ///
    /// At-most-once гарантия на (factory_id, scope): слот - OnceCell,
    /// конкурентный проигравший кооперативно ждёт значение победителя.
    /// Мьютекс карты слотов не удерживается во время построения.
    pub(crate) fn get_or_create<F>(
        &self,
        factory_id: FactoryId,
        type_name: &'static str,
        disposer: Option<&DisposerFn>,
        build: F,
    ) -> DIResult<AnyArc>
    where
        F: FnOnce() -> DIResult<AnyArc>,
    {
        self.alive_or_error(type_name)?;

        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(factory_id)
                    .or_insert_with(|| Arc::new(InstanceSlot::new())),
            )
        };

        let value = slot
            .cell
            .get_or_try_init(|| {
                let value = build()?;
                if let Some(disposer) = disposer {
                    self.track_disposal(type_name, value.clone(), disposer.clone());
                }
                Ok::<AnyArc, DIError>(value)
            })?
            .clone();
        Ok(value)
    }

    /// Зарегистрировать экземпляр на утилизацию этим scope'ом.
    pub(crate) fn track_disposal(&self, type_name: &'static str, value: AnyArc, disposer: DisposerFn) {
        self.disposers.lock().push(DisposalEntry {
            type_name,
            value,
            disposer,
        });
    }

    pub(crate) fn tracked_disposals(&self) -> usize {
        self.disposers.lock().len()
    }

    /// Закрыть scope: утилизировать свои экземпляры (LIFO) и отцепиться
    /// от родителя.
    ///
    /// Живые дочерние scope - ошибка без частичной утилизации: сначала
    /// закройте детей. Повторный/конкурентный close - no-op.
    pub fn close(&self) -> DIResult<()> {
        let open_children = self.open_children.load(Ordering::Acquire);
        if open_children > 0 {
            return Err(DIError::ScopeHasOpenChildren {
                scope: self.label(),
                open_children,
            });
        }

        // Атомарный claim: ровно один вызов выполняет утилизацию
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let entries = std::mem::take(&mut *self.disposers.lock());
        let mut failures = Vec::new();
        for entry in entries.into_iter().rev() {
            if let Err(err) = (entry.disposer)(&entry.value) {
                error!(
                    type_name = entry.type_name,
                    error = %err,
                    "disposer failed, continuing with remaining disposals"
                );
                failures.push(format!("{}: {err}", entry.type_name));
            }
        }

        self.slots.lock().clear();

        if let Some(parent) = &self.parent {
            parent.open_children.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(scope = %self.label(), "scope closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DIError::ScopeDispose {
                scope: self.label(),
                failures,
            })
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) && !self.disposers.lock().is_empty() {
            warn!(
                scope = %self.label(),
                "⚠️ scope dropped with undisposed resources, call close() explicitly"
            );
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("is_root", &self.is_root())
            .field("disposed", &self.is_disposed())
            .field("open_children", &self.open_children.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicU32;

    fn noop_disposer() -> DisposerFn {
        Arc::new(|_| Ok(()))
    }

    #[test]
    fn test_get_or_create_caches_instance() {
        let scope = Scope::root();
        let built = AtomicU32::new(0);

        for _ in 0..3 {
            let value = scope
                .get_or_create(1, "svc", None, || {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(42u32) as AnyArc)
                })
                .expect("create");
            assert_eq!(*value.downcast::<u32>().expect("u32"), 42);
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_get_or_create_builds_once() {
        let scope = Scope::root();
        let built = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let scope = Arc::clone(&scope);
            let built = Arc::clone(&built);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                scope
                    .get_or_create(7, "svc", None, || {
                        built.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(1u8) as AnyArc)
                    })
                    .expect("create")
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposal_is_lifo() {
        let order: Arc<PlMutex<Vec<&'static str>>> = Arc::new(PlMutex::new(Vec::new()));
        let scope = Scope::root();

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let disposer: DisposerFn = Arc::new(move |_| {
                order.lock().push(name);
                Ok(())
            });
            scope.track_disposal(name, Arc::new(()) as AnyArc, disposer);
        }

        scope.close().expect("close");
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_close_with_open_children_fails_loudly() {
        let root = Scope::root();
        let parent = root.child(Some("parent".to_string()));
        let _child = parent.child(Some("child".to_string()));

        let result = parent.close();
        assert!(matches!(
            result,
            Err(DIError::ScopeHasOpenChildren { open_children: 1, .. })
        ));
        // Родитель не утилизирован частично
        assert!(!parent.is_disposed());
    }

    #[test]
    fn test_close_after_children_closed() {
        let root = Scope::root();
        let parent = root.child(None);
        let child = parent.child(None);

        child.close().expect("child close");
        parent.close().expect("parent close");
        assert!(parent.is_disposed());
    }

    #[test]
    fn test_concurrent_close_disposes_once() {
        let scope = Arc::new(Scope::root());
        let dispose_count = Arc::new(AtomicU32::new(0));
        {
            let dispose_count = Arc::clone(&dispose_count);
            let disposer: DisposerFn = Arc::new(move |_| {
                dispose_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            scope.track_disposal("svc", Arc::new(()) as AnyArc, disposer);
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let scope = Arc::clone(&scope);
            handles.push(std::thread::spawn(move || scope.close()));
        }
        for handle in handles {
            handle.join().expect("join").expect("close ok");
        }
        assert_eq!(dispose_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposal_failures_are_aggregated() {
        let scope = Scope::root();
        let failing: DisposerFn = Arc::new(|_| Err(anyhow::anyhow!("resource busy")));
        scope.track_disposal("bad_one", Arc::new(()) as AnyArc, failing.clone());
        scope.track_disposal("good", Arc::new(()) as AnyArc, noop_disposer());
        scope.track_disposal("bad_two", Arc::new(()) as AnyArc, failing);

        let error = scope.close().expect_err("failures reported");
        match error {
            DIError::ScopeDispose { failures, .. } => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_in_disposed_scope_fails() {
        let root = Scope::root();
        let scope = root.child(Some("request".to_string()));
        scope.close().expect("close");

        let result = scope.get_or_create(1, "svc", None, || Ok(Arc::new(()) as AnyArc));
        assert!(matches!(result, Err(DIError::NoCurrentScope { .. })));
    }

    #[test]
    fn test_disposed_root_reports_container_disposed() {
        let root = Scope::root();
        root.close().expect("close");
        let result = root.get_or_create(1, "svc", None, || Ok(Arc::new(()) as AnyArc));
        assert!(matches!(result, Err(DIError::ContainerDisposed { .. })));
    }

    #[test]
    fn test_find_named_walks_ancestors() {
        let root = Scope::root();
        let web = root.child(Some("web-request".to_string()));
        let inner = web.child(None);

        let found = inner.find_named("web-request").expect("found");
        assert!(Arc::ptr_eq(&found, &web));
        assert!(inner.find_named("missing").is_none());
    }
}
