//! Контекст резолюции: неизменяемая связная цепочка запросов.
//!
//! Request - это узел односвязного списка "что сейчас резолвится и почему".
//! Живёт только в пределах одного вызова resolve (stack-like, наружу не
//! утекает). Используется для:
//! - обнаружения циклов: проход по цепочке родителей со сравнением пар
//!   (service_type, factory_id)
//! - рендера диагностических путей резолюции в ошибках
//!
//! Это не циклическая структура данных: каждый узел владеет только ссылкой
//! на родителя, "цикл" обнаруживается сравнением значений на строго
//! линейной цепочке.

use std::any::TypeId;
use std::sync::Arc;

use crate::errors::ResolutionChain;
use crate::factory::FactoryId;
use crate::key::ServiceKey;

/// Узел цепочки резолюции.
#[derive(Debug, Clone)]
pub struct Request {
    pub service_type: TypeId,
    pub type_name: &'static str,
    pub key: Option<ServiceKey>,
    /// Тип, по которому реально ищется регистрация (required service type);
    /// None - совпадает с service_type.
    pub required_type: Option<TypeId>,
    /// Фабрика, выбранная для этого запроса. None только у диагностических
    /// узлов, созданных до выбора фабрики.
    pub factory_id: Option<FactoryId>,
    parent: Option<Arc<Request>>,
    depth: usize,
}

impl Request {
    /// Корневой запрос (внешний вызов resolve).
    pub fn root(
        service_type: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_type,
            type_name,
            key,
            required_type,
            factory_id: None,
            parent: None,
            depth: 0,
        })
    }

    /// Дочерний запрос (зависимость текущего).
    pub fn push(
        self: &Arc<Self>,
        service_type: TypeId,
        type_name: &'static str,
        key: Option<ServiceKey>,
        required_type: Option<TypeId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_type,
            type_name,
            key,
            required_type,
            factory_id: None,
            parent: Some(Arc::clone(self)),
            depth: self.depth + 1,
        })
    }

    /// Копия узла с зафиксированной выбранной фабрикой.
    pub fn with_factory(&self, factory_id: FactoryId) -> Arc<Self> {
        Arc::new(Self {
            factory_id: Some(factory_id),
            ..self.clone()
        })
    }

    pub fn parent(&self) -> Option<&Arc<Request>> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Есть ли уже в цепочке (включая текущий узел) пара
    /// (service_type, factory_id)? true означает логический цикл.
    pub fn is_circular(&self, service_type: TypeId, factory_id: FactoryId) -> bool {
        let mut current = Some(self);
        while let Some(node) = current {
            if node.service_type == service_type && node.factory_id == Some(factory_id) {
                return true;
            }
            current = node.parent.as_deref();
        }
        false
    }

    /// Снять цепочку для диагностики, от корня к текущему узлу.
    pub fn chain(&self) -> ResolutionChain {
        let mut segments = Vec::with_capacity(self.depth + 1);
        let mut current = Some(self);
        while let Some(node) = current {
            segments.push((node.type_name, node.key.clone()));
            current = node.parent.as_deref();
        }

        let mut chain = ResolutionChain::new();
        for (type_name, key) in segments.into_iter().rev() {
            chain.push(type_name, key);
        }
        chain
    }

    /// Цепочка текущего запроса, продолженная ещё одним сегментом.
    /// Удобно для ошибок о недостижимой зависимости.
    pub fn chain_with(&self, type_name: &'static str, key: Option<ServiceKey>) -> ResolutionChain {
        let mut chain = self.chain();
        chain.push(type_name, key);
        chain
    }
}
