use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::provider::ServiceProvider;
use crate::error::{EdgeError, ResolveError};

/// A singleton with startup and shutdown lifecycle hooks.
///
/// Listeners and background workers implement this; the provider starts them
/// in priority order during [`start_hosted_services`]
/// (crate::di::ServiceProvider::start_hosted_services) and stops them in
/// reverse order at shutdown.
pub trait HostedService: Send + Sync + 'static {
    /// Begin background work and return. Must not block the caller for the
    /// lifetime of the service.
    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>>;

    /// Graceful shutdown. Failures are the implementation's to log.
    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

pub(crate) type HostedResolver =
    Arc<dyn Fn(&ServiceProvider) -> Result<Arc<dyn HostedService>, ResolveError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct HostedEntry {
    pub priority: i32,
    pub name: &'static str,
    pub resolver: HostedResolver,
}
