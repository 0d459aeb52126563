//! Dependency-injection container.
//!
//! Services are registered against a key type with one of three lifetimes
//! (singleton, scoped, transient) and resolved by type. Resolution is
//! reflection-free: handlers get a pre-compiled [`InjectionPlan`] at
//! registration time (see [`injection`]), and constructor injection is the
//! [`Construct`] impl of the service itself.

mod descriptor;
mod hosted;
pub mod injection;
mod provider;

pub use descriptor::{ServiceDescriptor, ServiceLifetime};
pub use hosted::HostedService;
pub use provider::{ResolveArgs, ServiceProvider};

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-erased service instance, as stored in the descriptor table and the
/// lifetime caches.
pub type BoxedService = Arc<dyn Any + Send + Sync>;

/// Key trait for resolvable services.
///
/// Plain services implement it with an empty body. A parameterized service
/// key (the `ILogger["app"]` pattern) overrides the three methods so that:
///
/// - [`origin`](Self::origin) names the *generic origin* the descriptor table
///   is keyed on — for a parameterized key this is the payload type its
///   shared factory produces;
/// - [`type_args`](Self::type_args) exposes the parameterization, handed to
///   the factory as [`ResolveArgs::generic_type_args`];
/// - [`adapt`](Self::adapt) wraps the factory's payload into `Self`.
///
/// The lifetime caches are keyed on `(descriptor, type_args)`, so different
/// parameterizations of one origin coexist as independent singletons while
/// sharing a single descriptor.
pub trait ServiceKey: Send + Sync + 'static {
    fn origin() -> TypeId
    where
        Self: Sized,
    {
        TypeId::of::<Self>()
    }

    fn service_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    fn type_args() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }

    /// Convert the value produced under the origin key into `Self`.
    /// The default expects the provider to have produced `Self` directly.
    fn adapt(raw: BoxedService) -> Option<BoxedService>
    where
        Self: Sized,
    {
        if raw.is::<Self>() {
            Some(raw)
        } else {
            None
        }
    }
}

/// Constructor injection: a service that can build itself from the container.
///
/// The impl is the service's injection plan — it resolves its dependencies
/// through the provider (threading `args` so cycles are detected) and fails
/// with a [`ResolveError`](crate::error::ResolveError) that propagates to the
/// caller.
pub trait Construct: Sized + Send + Sync + 'static {
    fn construct(
        provider: &ServiceProvider,
        args: &ResolveArgs<'_>,
    ) -> Result<Self, crate::error::ResolveError>;
}
