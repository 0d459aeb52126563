use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use dashmap::DashMap;

use super::descriptor::{Provider, ServiceDescriptor, ServiceLifetime};
use super::hosted::{HostedEntry, HostedResolver, HostedService};
use super::injection::ValueMap;
use super::{BoxedService, Construct, ServiceKey};
use crate::error::{EdgeError, ResolveError};

/// Cache key for lifetime caches: the descriptor plus the parameterization
/// it was resolved under, so parameterizations of one generic origin coexist.
type CacheKey = (u64, &'static [&'static str]);

type DescriptorTable = HashMap<TypeId, Vec<Arc<ServiceDescriptor>>>;

struct Shared {
    descriptors: RwLock<DescriptorTable>,
    singletons: DashMap<CacheKey, BoxedService>,
    hosted: Mutex<Vec<HostedEntry>>,
    started: Mutex<Vec<(&'static str, Arc<dyn HostedService>)>>,
    next_id: AtomicU64,
}

/// Scope-local state: registrations made on the scope (e.g. the active
/// context registering itself) and the scoped-instance cache.
struct ScopeState {
    descriptors: RwLock<DescriptorTable>,
    cache: Mutex<HashMap<CacheKey, BoxedService>>,
}

impl ScopeState {
    fn new() -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

/// Per-resolution state threaded through constructor injection: the
/// parameterization of the service being built, optional caller-supplied
/// values, and the construction stack used for cycle detection.
pub struct ResolveArgs<'a> {
    pub generic_type_args: &'static [&'static str],
    values: Option<&'a ValueMap>,
    stack: Rc<RefCell<Vec<StackEntry>>>,
}

type StackEntry = (TypeId, &'static [&'static str], &'static str);

impl<'a> ResolveArgs<'a> {
    pub fn new() -> Self {
        Self {
            generic_type_args: &[],
            values: None,
            stack: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn with_values(values: &'a ValueMap) -> Self {
        Self {
            generic_type_args: &[],
            values: Some(values),
            stack: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// The caller-supplied value mapping, if any.
    pub fn values(&self) -> Option<&ValueMap> {
        self.values
    }

    fn child(&self, generic_type_args: &'static [&'static str]) -> ResolveArgs<'a> {
        ResolveArgs {
            generic_type_args,
            values: self.values,
            stack: self.stack.clone(),
        }
    }

    fn enter(
        &self,
        origin: TypeId,
        type_args: &'static [&'static str],
        name: &'static str,
    ) -> Result<StackGuard, ResolveError> {
        let mut stack = self.stack.borrow_mut();
        if stack
            .iter()
            .any(|(id, args, _)| *id == origin && *args == type_args)
        {
            let mut path: Vec<&'static str> = stack.iter().map(|(_, _, n)| *n).collect();
            path.push(name);
            return Err(ResolveError::CircularDependency { path });
        }
        stack.push((origin, type_args, name));
        Ok(StackGuard {
            stack: self.stack.clone(),
        })
    }
}

impl Default for ResolveArgs<'_> {
    fn default() -> Self {
        Self::new()
    }
}

struct StackGuard {
    stack: Rc<RefCell<Vec<StackEntry>>>,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Lifetime-aware service registry and resolver.
///
/// The root provider owns the descriptor table and the shared singleton
/// cache. [`create_scope`](Self::create_scope) returns a child sharing both,
/// plus a fresh scope-local table and scoped-instance cache. Registrations
/// made on a scope are visible only inside it. Registration methods chain.
#[derive(Clone)]
pub struct ServiceProvider {
    shared: Arc<Shared>,
    scope: Arc<ScopeState>,
    /// Whether registrations land in the scope-local table instead of the
    /// shared one. The root provider still owns a scoped-instance cache so
    /// scoped services resolve there too.
    is_scope: bool,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                descriptors: RwLock::new(HashMap::new()),
                singletons: DashMap::new(),
                hosted: Mutex::new(Vec::new()),
                started: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            scope: Arc::new(ScopeState::new()),
            is_scope: false,
        }
    }

    // ── Registration ────────────────────────────────────────────────────

    fn register(
        &self,
        key: TypeId,
        service_name: &'static str,
        lifetime: ServiceLifetime,
        provider: Provider,
    ) -> u64 {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = Arc::new(ServiceDescriptor::new(id, service_name, lifetime, provider));
        let table = if self.is_scope {
            &self.scope.descriptors
        } else {
            &self.shared.descriptors
        };
        table.write().unwrap().entry(key).or_default().push(descriptor);
        id
    }

    /// Register a singleton constructed via its [`Construct`] impl.
    pub fn add_singleton<T: ServiceKey + Construct>(&self) -> &Self {
        self.add_with_lifetime::<T>(ServiceLifetime::Singleton)
    }

    /// Register a singleton built by a factory. The factory receives the
    /// provider and the [`ResolveArgs`] carrying any generic type arguments.
    pub fn add_singleton_factory<T: ServiceKey>(
        &self,
        factory: impl Fn(&ServiceProvider, &ResolveArgs<'_>) -> Result<T, ResolveError>
            + Send
            + Sync
            + 'static,
    ) -> &Self {
        self.add_factory_with_lifetime(ServiceLifetime::Singleton, factory)
    }

    /// Register a pre-built instance. Implies singleton lifetime.
    pub fn add_singleton_instance<T: ServiceKey>(&self, instance: T) -> &Self {
        self.add_singleton_arc(Arc::new(instance))
    }

    /// Register a shared pre-built instance. Implies singleton lifetime.
    pub fn add_singleton_arc<T: ServiceKey>(&self, instance: Arc<T>) -> &Self {
        self.register(
            T::origin(),
            T::service_name(),
            ServiceLifetime::Singleton,
            Provider::Instance(instance),
        );
        self
    }

    /// Register a weakly-held instance. Resolution upgrades the reference and
    /// fails once the instance is gone. Used by contexts registering
    /// themselves in their own scope without creating a reference cycle.
    pub fn add_singleton_weak<T: ServiceKey>(&self, instance: Weak<T>) -> &Self {
        let weak: Weak<dyn Any + Send + Sync> = instance;
        self.register(
            T::origin(),
            T::service_name(),
            ServiceLifetime::Singleton,
            Provider::WeakInstance(weak),
        );
        self
    }

    pub fn add_scoped<T: ServiceKey + Construct>(&self) -> &Self {
        self.add_with_lifetime::<T>(ServiceLifetime::Scoped)
    }

    pub fn add_scoped_factory<T: ServiceKey>(
        &self,
        factory: impl Fn(&ServiceProvider, &ResolveArgs<'_>) -> Result<T, ResolveError>
            + Send
            + Sync
            + 'static,
    ) -> &Self {
        self.add_factory_with_lifetime(ServiceLifetime::Scoped, factory)
    }

    pub fn add_transient<T: ServiceKey + Construct>(&self) -> &Self {
        self.add_with_lifetime::<T>(ServiceLifetime::Transient)
    }

    pub fn add_transient_factory<T: ServiceKey>(
        &self,
        factory: impl Fn(&ServiceProvider, &ResolveArgs<'_>) -> Result<T, ResolveError>
            + Send
            + Sync
            + 'static,
    ) -> &Self {
        self.add_factory_with_lifetime(ServiceLifetime::Transient, factory)
    }

    fn add_with_lifetime<T: ServiceKey + Construct>(&self, lifetime: ServiceLifetime) -> &Self {
        self.add_factory_with_lifetime(lifetime, T::construct)
    }

    fn add_factory_with_lifetime<T, F>(&self, lifetime: ServiceLifetime, factory: F) -> &Self
    where
        T: ServiceKey,
        F: Fn(&ServiceProvider, &ResolveArgs<'_>) -> Result<T, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        let factory = Arc::new(
            move |provider: &ServiceProvider, args: &ResolveArgs<'_>| {
                factory(provider, args).map(|value| Arc::new(value) as BoxedService)
            },
        );
        self.register(
            T::origin(),
            T::service_name(),
            lifetime,
            Provider::Factory(factory),
        );
        self
    }

    /// Mark a registered singleton as lifecycle-managed. Hosted services are
    /// resolved and started by priority (higher first) at framework startup
    /// and stopped in reverse order at shutdown.
    pub fn add_hosted<T: ServiceKey + HostedService>(&self, priority: i32) -> &Self {
        let resolver: HostedResolver = Arc::new(|provider: &ServiceProvider| {
            provider
                .resolve::<T>()
                .map(|service| service as Arc<dyn HostedService>)
        });
        self.shared.hosted.lock().unwrap().push(HostedEntry {
            priority,
            name: T::service_name(),
            resolver,
        });
        self
    }

    /// Register a pre-built hosted service instance. Used for several
    /// instances of the same listener type (e.g. one per HTTP endpoint).
    pub fn add_hosted_arc(
        &self,
        priority: i32,
        name: &'static str,
        service: Arc<dyn HostedService>,
    ) -> &Self {
        let resolver: HostedResolver = Arc::new(move |_| Ok(service.clone()));
        self.shared.hosted.lock().unwrap().push(HostedEntry {
            priority,
            name,
            resolver,
        });
        self
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub fn is_registered<T: ServiceKey>(&self) -> bool {
        self.last_descriptor(T::origin()).is_some()
    }

    /// Lifetime of the most recent registration for `T`, if any.
    pub fn get_lifetime<T: ServiceKey>(&self) -> Option<ServiceLifetime> {
        self.last_descriptor(T::origin())
            .map(|(desc, _)| desc.lifetime())
    }

    /// Remove every registration for `T`, discarding cached singletons.
    pub fn remove<T: ServiceKey>(&self) -> bool {
        let key = T::origin();
        let mut removed: Vec<Arc<ServiceDescriptor>> = Vec::new();
        if let Some(list) = self.scope.descriptors.write().unwrap().remove(&key) {
            removed.extend(list);
        }
        if let Some(list) = self.shared.descriptors.write().unwrap().remove(&key) {
            removed.extend(list);
        }
        if removed.is_empty() {
            return false;
        }
        let ids: Vec<u64> = removed.iter().map(|d| d.id).collect();
        self.shared
            .singletons
            .retain(|(desc_id, _), _| !ids.contains(desc_id));
        self.scope
            .cache
            .lock()
            .unwrap()
            .retain(|(desc_id, _), _| !ids.contains(desc_id));
        true
    }

    // ── Scoping ─────────────────────────────────────────────────────────

    /// Child provider sharing descriptors and singletons but owning a fresh
    /// scope-local table and scoped-instance cache.
    pub fn create_scope(&self) -> ServiceProvider {
        ServiceProvider {
            shared: self.shared.clone(),
            scope: Arc::new(ScopeState::new()),
            is_scope: true,
        }
    }

    /// Drop this scope's cached instances. Singletons are untouched.
    pub fn clear_scope(&self) {
        self.scope.cache.lock().unwrap().clear();
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve `T`, constructing it if needed according to its lifetime.
    pub fn resolve<T: ServiceKey>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_with::<T>(&ResolveArgs::new())
    }

    /// Resolve `T` with explicit resolution arguments (used for nested
    /// constructor injection and for value overrides).
    pub fn resolve_with<T: ServiceKey>(&self, args: &ResolveArgs<'_>) -> Result<Arc<T>, ResolveError> {
        let (descriptor, local) =
            self.last_descriptor(T::origin())
                .ok_or(ResolveError::NotRegistered {
                    service: T::service_name(),
                })?;
        self.resolve_descriptor::<T>(&descriptor, local, args)
    }

    /// Resolve `T` as an `Option`, mapping every failure to `None`.
    /// Use [`resolve`](Self::resolve) where construction failures must
    /// propagate.
    pub fn get_service<T: ServiceKey>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    /// Resolve one instance per registered descriptor for `T`, each per its
    /// own lifetime, in registration order.
    pub fn get_services<T: ServiceKey>(&self) -> Result<Vec<Arc<T>>, ResolveError> {
        let key = T::origin();
        let mut entries: Vec<(Arc<ServiceDescriptor>, bool)> = self
            .shared
            .descriptors
            .read()
            .unwrap()
            .get(&key)
            .map(|list| list.iter().map(|d| (d.clone(), false)).collect())
            .unwrap_or_default();
        if let Some(list) = self.scope.descriptors.read().unwrap().get(&key) {
            entries.extend(list.iter().map(|d| (d.clone(), true)));
        }
        let args = ResolveArgs::new();
        entries
            .iter()
            .map(|(descriptor, local)| self.resolve_descriptor::<T>(descriptor, *local, &args))
            .collect()
    }

    /// Latest registration for a key: scope-local registrations shadow the
    /// shared table. Returns whether the descriptor is scope-local.
    fn last_descriptor(&self, key: TypeId) -> Option<(Arc<ServiceDescriptor>, bool)> {
        if let Some(descriptor) = self
            .scope
            .descriptors
            .read()
            .unwrap()
            .get(&key)
            .and_then(|list| list.last())
        {
            return Some((descriptor.clone(), true));
        }
        self.shared
            .descriptors
            .read()
            .unwrap()
            .get(&key)
            .and_then(|list| list.last())
            .map(|descriptor| (descriptor.clone(), false))
    }

    fn resolve_descriptor<T: ServiceKey>(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        local: bool,
        args: &ResolveArgs<'_>,
    ) -> Result<Arc<T>, ResolveError> {
        let _guard = args.enter(T::origin(), T::type_args(), T::service_name())?;
        let call_args = args.child(T::type_args());
        let key: CacheKey = (descriptor.id, T::type_args());

        match descriptor.lifetime() {
            ServiceLifetime::Transient => {
                let value = self.construct_adapted::<T>(descriptor, &call_args)?;
                Self::downcast::<T>(value)
            }
            // A singleton registered on a scope lives for that scope; one
            // registered on the root lives for the process.
            ServiceLifetime::Singleton if !local => {
                if let Some(cached) = self.shared.singletons.get(&key) {
                    return Self::downcast::<T>(cached.value().clone());
                }
                // Double-checked first-touch: the per-descriptor lock keeps
                // concurrent resolvers from constructing twice while leaving
                // nested resolution of other descriptors unobstructed.
                let _construction = descriptor.lock_construction();
                if let Some(cached) = self.shared.singletons.get(&key) {
                    return Self::downcast::<T>(cached.value().clone());
                }
                let value = self.construct_adapted::<T>(descriptor, &call_args)?;
                if !descriptor.is_weak() {
                    self.shared.singletons.insert(key, value.clone());
                }
                Self::downcast::<T>(value)
            }
            _ => {
                if let Some(cached) = self.scope.cache.lock().unwrap().get(&key).cloned() {
                    return Self::downcast::<T>(cached);
                }
                let value = self.construct_adapted::<T>(descriptor, &call_args)?;
                if !descriptor.is_weak() {
                    self.scope
                        .cache
                        .lock()
                        .unwrap()
                        .entry(key)
                        .or_insert_with(|| value.clone());
                }
                Self::downcast::<T>(value)
            }
        }
    }

    fn construct_adapted<T: ServiceKey>(
        &self,
        descriptor: &ServiceDescriptor,
        args: &ResolveArgs<'_>,
    ) -> Result<BoxedService, ResolveError> {
        let raw = descriptor.construct(self, args)?;
        T::adapt(raw).ok_or(ResolveError::TypeMismatch {
            service: T::service_name(),
        })
    }

    fn downcast<T: ServiceKey>(value: BoxedService) -> Result<Arc<T>, ResolveError> {
        value
            .downcast::<T>()
            .map_err(|_| ResolveError::TypeMismatch {
                service: T::service_name(),
            })
    }

    // ── Hosted lifecycle ────────────────────────────────────────────────

    /// Resolve and start all hosted services, highest priority first.
    pub async fn start_hosted_services(&self) -> Result<(), EdgeError> {
        let mut entries: Vec<HostedEntry> = self.shared.hosted.lock().unwrap().clone();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.priority));
        for entry in entries {
            let service = (entry.resolver)(self)?;
            tracing::info!(service = entry.name, "starting hosted service");
            service.start().await?;
            self.shared.started.lock().unwrap().push((entry.name, service));
        }
        Ok(())
    }

    /// Stop started hosted services in reverse start order, best-effort.
    pub async fn stop_hosted_services(&self) {
        loop {
            let next = self.shared.started.lock().unwrap().pop();
            let Some((name, service)) = next else { break };
            tracing::info!(service = name, "stopping hosted service");
            service.stop().await;
        }
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}
