use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::provider::{ResolveArgs, ServiceProvider};
use super::BoxedService;
use crate::error::ResolveError;

/// Service lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// One instance for the process, cached on first resolution.
    Singleton,
    /// One instance per request scope.
    Scoped,
    /// A fresh instance on every resolution.
    Transient,
}

pub(crate) type FactoryFn =
    Arc<dyn Fn(&ServiceProvider, &ResolveArgs<'_>) -> Result<BoxedService, ResolveError> + Send + Sync>;

pub(crate) enum Provider {
    /// Eager instance supplied at registration. Forces singleton lifetime.
    Instance(BoxedService),
    /// Weakly-held instance; resolution fails once the owner drops it.
    WeakInstance(Weak<dyn Any + Send + Sync>),
    /// Factory taking the provider and the resolution arguments.
    Factory(FactoryFn),
}

/// A single registration record. Immutable after registration; multiple
/// descriptors may share a key type, in which case plain resolution returns
/// the most recently registered and collection resolution returns all.
pub struct ServiceDescriptor {
    pub(crate) id: u64,
    pub(crate) service_name: &'static str,
    pub(crate) lifetime: ServiceLifetime,
    pub(crate) provider: Provider,
    /// Serializes first-touch construction of the singleton instance.
    construction: Mutex<()>,
}

impl ServiceDescriptor {
    pub(crate) fn new(
        id: u64,
        service_name: &'static str,
        lifetime: ServiceLifetime,
        provider: Provider,
    ) -> Self {
        Self {
            id,
            service_name,
            lifetime,
            provider,
            construction: Mutex::new(()),
        }
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    pub(crate) fn lock_construction(&self) -> MutexGuard<'_, ()> {
        self.construction.lock().unwrap()
    }

    /// Weakly-held instances must not enter the lifetime caches: a cached
    /// strong reference would keep the owner's instance alive forever.
    pub(crate) fn is_weak(&self) -> bool {
        matches!(self.provider, Provider::WeakInstance(_))
    }

    pub(crate) fn construct(
        &self,
        provider: &ServiceProvider,
        args: &ResolveArgs<'_>,
    ) -> Result<BoxedService, ResolveError> {
        match &self.provider {
            Provider::Instance(value) => Ok(value.clone()),
            Provider::WeakInstance(weak) => weak.upgrade().ok_or(ResolveError::Construction {
                service: self.service_name,
                message: "weakly-registered instance is no longer alive".to_string(),
            }),
            Provider::Factory(factory) => factory(provider, args),
        }
    }
}
