//! Service resolution for handlers.
//!
//! The transport opens one [`ServiceScope`] per inbound request and drops it
//! when the request completes. Handlers reach services through
//! [`Request::service`](crate::router::Request::service).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Produces request-scoped service lookups.
pub trait ServiceResolver: Send + Sync + 'static {
    fn begin_scope(&self) -> Box<dyn ServiceScope>;
}

/// Services visible to a single request.
pub trait ServiceScope: Send + 'static {
    fn resolve(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Resolver handing every request the same set of shared instances.
#[derive(Default, Clone)]
pub struct SharedServices {
    services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SharedServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under its own type.
    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        Arc::make_mut(&mut self.services).insert(TypeId::of::<T>(), Arc::new(service));
        self
    }
}

impl ServiceResolver for SharedServices {
    fn begin_scope(&self) -> Box<dyn ServiceScope> {
        Box::new(self.clone())
    }
}

impl ServiceScope for SharedServices {
    fn resolve(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(&type_id).cloned()
    }
}
