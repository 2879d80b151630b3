//! Исполнение планов: двухуровневая стратегия интерпретация/компиляция.
//!
//! Первая резолюция ключа обслуживается ИНТЕРПРЕТАЦИЕЙ дерева выражения -
//! без затрат на компиляцию для one-shot резолюций (например, при
//! Validate). Когда счётчик обращений превышает порог из Rules, выражение
//! КОМПИЛИРУЕТСЯ в дерево boxed-замыканий и интерпретируемый путь
//! замещается. Компиляцию можно проиграть конкурентно: лишний результат
//! просто отбрасывается (OnceCell::set), это не ошибка.
//!
//! Кэш планов версионируется поколением реестра: новая регистрация
//! публикует новое поколение, кэш инвалидируется целиком (свежая карта),
//! а не мутируется.

use std::any::TypeId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::container::ResolveContext;
use crate::errors::DIResult;
use crate::key::{AnyArc, ServiceKey};
use crate::plan::Expr;

/// Скомпилированный план: прямое замыкание без обхода дерева.
pub(crate) type CompiledFn = Arc<dyn Fn(&ResolveContext) -> DIResult<AnyArc> + Send + Sync>;

/// Интерпретация дерева выражения (холодный путь).
pub(crate) fn interpret(expr: &Expr, ctx: &ResolveContext) -> DIResult<AnyArc> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Construct {
            ctor,
            finish,
            args,
            members,
            ..
        } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(interpret(arg, ctx)?);
            }
            let mut raw = (ctor.invoke)(values)?;
            for (member, dependency) in members {
                let value = interpret(dependency, ctx)?;
                (member.inject)(raw.as_mut(), value)?;
            }
            finish(raw)
        }
        Expr::Delegate { func } => func(ctx),
        Expr::Decorate { inner, decorate } => {
            let value = interpret(inner, ctx)?;
            decorate(ctx, value)
        }
        Expr::Scoped {
            reuse,
            factory_id,
            type_name,
            disposer,
            inner,
        } => {
            let scope = ctx.scope_for(reuse, type_name)?;
            scope.get_or_create(*factory_id, type_name, disposer.as_ref(), || {
                interpret(inner, ctx)
            })
        }
        Expr::Tracked {
            type_name,
            disposer,
            inner,
        } => {
            let value = interpret(inner, ctx)?;
            ctx.current_scope()
                .track_disposal(type_name, value.clone(), disposer.clone());
            Ok(value)
        }
        Expr::Convert { convert, inner } => {
            let value = interpret(inner, ctx)?;
            convert(value)
        }
        Expr::DefaultOf { produce } => Ok(produce()),
        Expr::RuntimeArg { index } => ctx.runtime_arg(*index),
    }
}

/// Компиляция дерева выражения в дерево замыканий (горячий путь).
pub(crate) fn compile(expr: &Expr) -> CompiledFn {
    match expr {
        Expr::Constant(value) => {
            let value = value.clone();
            Arc::new(move |_| Ok(value.clone()))
        }
        Expr::Construct {
            ctor,
            finish,
            args,
            members,
            ..
        } => {
            let arg_fns: Vec<CompiledFn> = args.iter().map(compile).collect();
            let member_fns: Vec<_> = members
                .iter()
                .map(|(member, dependency)| (member.clone(), compile(dependency)))
                .collect();
            let ctor = Arc::clone(ctor);
            let finish = finish.clone();
            Arc::new(move |ctx| {
                let mut values = Vec::with_capacity(arg_fns.len());
                for arg_fn in &arg_fns {
                    values.push(arg_fn(ctx)?);
                }
                let mut raw = (ctor.invoke)(values)?;
                for (member, dependency_fn) in &member_fns {
                    (member.inject)(raw.as_mut(), dependency_fn(ctx)?)?;
                }
                finish(raw)
            })
        }
        Expr::Delegate { func } => {
            let func = func.clone();
            Arc::new(move |ctx| func(ctx))
        }
        Expr::Decorate { inner, decorate } => {
            let inner = compile(inner);
            let decorate = decorate.clone();
            Arc::new(move |ctx| {
                let value = inner(ctx)?;
                decorate(ctx, value)
            })
        }
        Expr::Scoped {
            reuse,
            factory_id,
            type_name,
            disposer,
            inner,
        } => {
            let inner = compile(inner);
            let reuse = reuse.clone();
            let factory_id = *factory_id;
            let type_name = *type_name;
            let disposer = disposer.clone();
            Arc::new(move |ctx| {
                let scope = ctx.scope_for(&reuse, type_name)?;
                scope.get_or_create(factory_id, type_name, disposer.as_ref(), || inner(ctx))
            })
        }
        Expr::Tracked {
            type_name,
            disposer,
            inner,
        } => {
            let inner = compile(inner);
            let type_name = *type_name;
            let disposer = disposer.clone();
            Arc::new(move |ctx| {
                let value = inner(ctx)?;
                ctx.current_scope()
                    .track_disposal(type_name, value.clone(), disposer.clone());
                Ok(value)
            })
        }
        Expr::Convert { convert, inner } => {
            let inner = compile(inner);
            let convert = convert.clone();
            Arc::new(move |ctx| convert(inner(ctx)?))
        }
        Expr::DefaultOf { produce } => {
            let produce = produce.clone();
            Arc::new(move |_| Ok(produce()))
        }
        Expr::RuntimeArg { index } => {
            let index = *index;
            Arc::new(move |ctx| ctx.runtime_arg(index))
        }
    }
}

/// Единица кэша: выражение + счётчик обращений + компилированная форма.
pub(crate) struct CompiledFactory {
    expr: Arc<Expr>,
    hits: AtomicU32,
    compiled: OnceCell<CompiledFn>,
}

impl CompiledFactory {
    pub(crate) fn new(expr: Expr) -> Self {
        Self {
            expr: Arc::new(expr),
            hits: AtomicU32::new(0),
            compiled: OnceCell::new(),
        }
    }

    pub(crate) fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Выполнить план: компилированная форма, если есть, иначе
    /// интерпретация с учётом порога компиляции.
    pub(crate) fn execute(&self, ctx: &ResolveContext, compile_threshold: u32) -> DIResult<AnyArc> {
        if let Some(compiled) = self.compiled.get() {
            return compiled(ctx);
        }

        let result = interpret(&self.expr, ctx);
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        if hits > compile_threshold {
            // Проигрыш гонки компиляции допустим: дубликат отбрасывается
            let _ = self.compiled.set(compile(&self.expr));
            debug!(hits, "plan compiled to closure tree");
        }
        result
    }
}

/// Ключ кэша планов.
pub(crate) type PlanKey = (TypeId, Option<ServiceKey>, Option<TypeId>);

type CacheMap = im::HashMap<PlanKey, Arc<CompiledFactory>>;

/// Кэш скомпилированных фабрик, привязанный к поколению реестра.
pub(crate) struct PlanCache {
    entries: ArcSwap<CacheMap>,
    /// Поколение реестра, под которое построены записи.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(CacheMap::new()),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Достать план, если кэш актуален для текущего поколения реестра.
    /// Устаревший кэш инвалидируется публикацией свежей пустой карты.
    pub(crate) fn get(
        &self,
        key: &PlanKey,
        current_generation: u64,
    ) -> Option<Arc<CompiledFactory>> {
        if self.generation.load(Ordering::Acquire) != current_generation {
            self.entries.store(Arc::new(CacheMap::new()));
            self.generation.store(current_generation, Ordering::Release);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.entries.load().get(key) {
            Some(factory) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(factory))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Положить план, построенный под указанное поколение. Планы под
    /// устаревшее поколение молча отбрасываются.
    pub(crate) fn insert(&self, key: PlanKey, factory: Arc<CompiledFactory>, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        loop {
            let current = self.entries.load();
            let next = current.update(key.clone(), Arc::clone(&factory));
            let prev = self.entries.compare_and_swap(&*current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &*current) {
                return;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub(crate) fn compiled_count(&self) -> usize {
        self.entries
            .load()
            .values()
            .filter(|factory| factory.is_compiled())
            .count()
    }

    pub(crate) fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_factory(value: u32) -> Arc<CompiledFactory> {
        Arc::new(CompiledFactory::new(Expr::Constant(
            Arc::new(value) as AnyArc
        )))
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = PlanCache::new();
        let key: PlanKey = (TypeId::of::<u32>(), None, None);

        assert!(cache.get(&key, 0).is_none());
        cache.insert(key.clone(), constant_factory(1), 0);
        assert!(cache.get(&key, 0).is_some());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_new_generation_invalidates_cache() {
        let cache = PlanCache::new();
        let key: PlanKey = (TypeId::of::<u32>(), None, None);
        cache.insert(key.clone(), constant_factory(1), 0);
        assert!(cache.get(&key, 0).is_some());

        // Реестр опубликовал новое поколение: кэш сбрасывается целиком
        assert!(cache.get(&key, 1).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_stale_insert_is_discarded() {
        let cache = PlanCache::new();
        let key: PlanKey = (TypeId::of::<u32>(), None, None);
        assert!(cache.get(&key, 3).is_none());

        cache.insert(key.clone(), constant_factory(1), 2);
        assert!(cache.get(&key, 3).is_none());
    }

    #[test]
    fn test_keyed_plan_keys_are_distinct() {
        let cache = PlanCache::new();
        let unkeyed: PlanKey = (TypeId::of::<u32>(), None, None);
        let keyed: PlanKey = (TypeId::of::<u32>(), Some(ServiceKey::from("a")), None);

        cache.insert(unkeyed.clone(), constant_factory(1), 0);
        assert!(cache.get(&unkeyed, 0).is_some());
        assert!(cache.get(&keyed, 0).is_none());
    }
}
