//! Статистика контейнера для диагностики и мониторинга.
//!
//! Счётчики собираются relaxed-атомиками на горячем пути (без локов),
//! снапшот сериализуем для диагностических дампов.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Коллектор счётчиков резолюции.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    resolutions_ok: AtomicU64,
    resolutions_failed: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn record_success(&self) {
        self.resolutions_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.resolutions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resolutions_ok(&self) -> u64 {
        self.resolutions_ok.load(Ordering::Relaxed)
    }

    pub(crate) fn resolutions_failed(&self) -> u64 {
        self.resolutions_failed.load(Ordering::Relaxed)
    }
}

/// Снапшот статистики контейнера.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub name: String,
    /// Количество сервисных типов в реестре.
    pub service_types: usize,
    /// Количество записей реестра (несколько реализаций считаются отдельно).
    pub registrations: usize,
    pub resolutions_ok: u64,
    pub resolutions_failed: u64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
    /// Планов в кэше сейчас.
    pub cached_plans: usize,
    /// Из них скомпилировано в замыкания.
    pub compiled_plans: usize,
    /// Singleton экземпляров, созданных в root scope.
    pub singleton_instances: usize,
}
