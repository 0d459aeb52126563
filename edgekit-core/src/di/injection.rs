//! Pre-compiled injection plans for handlers.
//!
//! The [`handler!`](crate::handler) and [`blocking_handler!`](crate::blocking_handler)
//! macros compile a handler's parameter list into an [`InjectionPlan`] once at
//! registration time: one [`ParamStrategy`] per parameter plus the
//! `has_value_parameters` / `is_blocking` flags. Per-request work is a walk
//! over the already-chosen strategies — no reflection, and the effective
//! value-mapping is only built when some parameter actually consumes it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::provider::ResolveArgs;
use super::{BoxedService, ServiceKey};
use crate::context::Context;
use crate::error::DispatchError;

// ── Value mapping ───────────────────────────────────────────────────────

/// One entry of the effective value-mapping (URL segments ⊕ query).
///
/// `Shared` entries carry typed overrides supplied by programmatic
/// invocation; they satisfy service strategies by name before the container
/// is consulted.
#[derive(Clone)]
pub enum ValueEntry {
    Single(String),
    Many(Vec<String>),
    Shared(BoxedService),
}

/// Name → value mapping evaluated by [`ParamStrategy::Value`] strategies.
#[derive(Clone, Default)]
pub struct ValueMap {
    entries: HashMap<String, ValueEntry>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), ValueEntry::Single(value.into()));
    }

    pub fn insert_many(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.entries.insert(name.into(), ValueEntry::Many(values));
    }

    /// Insert a typed override satisfying a service strategy by name.
    pub fn insert_shared<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.entries.insert(name.into(), ValueEntry::Shared(value));
    }

    pub fn get(&self, name: &str) -> Option<&ValueEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Value conversion ────────────────────────────────────────────────────

/// Conversion targets supported by value strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTarget {
    Str,
    Int,
    Float,
    List,
    Set,
}

/// Conversion from a value-mapping entry. Failure yields `None`, never an
/// error.
pub trait FromValue: Sized + Send {
    const TARGET: ValueTarget;

    fn from_entry(entry: &ValueEntry) -> Option<Self>;
}

impl FromValue for String {
    const TARGET: ValueTarget = ValueTarget::Str;

    fn from_entry(entry: &ValueEntry) -> Option<Self> {
        match entry {
            ValueEntry::Single(s) => Some(s.clone()),
            ValueEntry::Many(list) => list.first().cloned(),
            ValueEntry::Shared(_) => None,
        }
    }
}

impl FromValue for i64 {
    const TARGET: ValueTarget = ValueTarget::Int;

    fn from_entry(entry: &ValueEntry) -> Option<Self> {
        String::from_entry(entry)?.trim().parse().ok()
    }
}

impl FromValue for f64 {
    const TARGET: ValueTarget = ValueTarget::Float;

    fn from_entry(entry: &ValueEntry) -> Option<Self> {
        String::from_entry(entry)?.trim().parse().ok()
    }
}

impl FromValue for Vec<String> {
    const TARGET: ValueTarget = ValueTarget::List;

    fn from_entry(entry: &ValueEntry) -> Option<Self> {
        match entry {
            ValueEntry::Single(s) => Some(vec![s.clone()]),
            ValueEntry::Many(list) => Some(list.clone()),
            ValueEntry::Shared(_) => None,
        }
    }
}

impl FromValue for HashSet<String> {
    const TARGET: ValueTarget = ValueTarget::Set;

    fn from_entry(entry: &ValueEntry) -> Option<Self> {
        Vec::<String>::from_entry(entry).map(|list| list.into_iter().collect())
    }
}

// ── Strategies & plan ───────────────────────────────────────────────────

/// Per-parameter resolution decision, recorded at handler-compile time.
#[derive(Debug, Clone)]
pub enum ParamStrategy {
    /// Obtain the argument from the effective value-mapping with conversion.
    Value { name: &'static str, target: ValueTarget },
    /// Use a same-named override from the mapping if present, otherwise
    /// resolve the service from the context's DI scope.
    Service { name: &'static str, service: &'static str },
    /// The active context itself, supplied positionally.
    Context { name: &'static str },
}

/// Ordered parameter strategies for one handler, computed once at
/// registration and reused on every call.
#[derive(Debug, Clone)]
pub struct InjectionPlan {
    params: Vec<ParamStrategy>,
    pub has_value_parameters: bool,
    pub is_blocking: bool,
}

impl InjectionPlan {
    pub fn new(params: Vec<ParamStrategy>, is_blocking: bool) -> Self {
        let has_value_parameters = params
            .iter()
            .any(|p| matches!(p, ParamStrategy::Value { .. }));
        Self {
            params,
            has_value_parameters,
            is_blocking,
        }
    }

    pub fn params(&self) -> &[ParamStrategy] {
        &self.params
    }
}

// ── Parameter wrappers ──────────────────────────────────────────────────

/// A handler parameter filled from the effective value-mapping.
/// Holds `None` when the name is absent or conversion fails.
#[derive(Debug, Clone)]
pub struct Value<T: FromValue>(pub Option<T>);

impl<T: FromValue> Value<T> {
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

/// A handler parameter resolved from the context's DI scope.
pub struct Svc<T: ServiceKey>(pub Arc<T>);

impl<T: ServiceKey> std::ops::Deref for Svc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ServiceKey> Clone for Svc<T> {
    fn clone(&self) -> Self {
        Svc(self.0.clone())
    }
}

/// Parameter extraction for handler arguments: the strategy is computed once
/// at registration, `resolve` runs per call.
pub trait FromContext: Sized + Send {
    fn strategy(name: &'static str) -> ParamStrategy;

    fn resolve(
        name: &'static str,
        ctx: &Arc<Context>,
        values: &ValueMap,
    ) -> Result<Self, DispatchError>;
}

impl<T: FromValue> FromContext for Value<T> {
    fn strategy(name: &'static str) -> ParamStrategy {
        ParamStrategy::Value {
            name,
            target: T::TARGET,
        }
    }

    fn resolve(
        name: &'static str,
        _ctx: &Arc<Context>,
        values: &ValueMap,
    ) -> Result<Self, DispatchError> {
        Ok(Value(values.get(name).and_then(T::from_entry)))
    }
}

impl<T: ServiceKey> FromContext for Svc<T> {
    fn strategy(name: &'static str) -> ParamStrategy {
        ParamStrategy::Service {
            name,
            service: T::service_name(),
        }
    }

    fn resolve(
        name: &'static str,
        ctx: &Arc<Context>,
        values: &ValueMap,
    ) -> Result<Self, DispatchError> {
        if let Some(ValueEntry::Shared(shared)) = values.get(name) {
            if let Ok(typed) = shared.clone().downcast::<T>() {
                return Ok(Svc(typed));
            }
        }
        let args = ResolveArgs::with_values(values);
        ctx.scope()
            .resolve_with::<T>(&args)
            .map(Svc)
            .map_err(DispatchError::Resolve)
    }
}

impl FromContext for Arc<Context> {
    fn strategy(name: &'static str) -> ParamStrategy {
        ParamStrategy::Context { name }
    }

    fn resolve(
        _name: &'static str,
        ctx: &Arc<Context>,
        _values: &ValueMap,
    ) -> Result<Self, DispatchError> {
        Ok(ctx.clone())
    }
}

// ── Handler results ─────────────────────────────────────────────────────

/// Protocol-neutral handler result, encoded into the context's response
/// envelope by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HandlerResult {
    Json(serde_json::Value),
    Text(String),
    Html(String),
    Bytes(Vec<u8>),
    /// Body is a filesystem path served by the host.
    File(String),
    /// No result: dispatch falls through to the next matching handler.
    None,
}

/// Conversion of handler return values into a [`HandlerResult`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError>;
}

impl IntoHandlerResult for HandlerResult {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(self)
    }
}

impl IntoHandlerResult for serde_json::Value {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(HandlerResult::Json(self))
    }
}

impl IntoHandlerResult for String {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(HandlerResult::Text(self))
    }
}

impl IntoHandlerResult for &'static str {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(HandlerResult::Text(self.to_string()))
    }
}

impl IntoHandlerResult for Vec<u8> {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(HandlerResult::Bytes(self))
    }
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        Ok(HandlerResult::None)
    }
}

impl<T: IntoHandlerResult> IntoHandlerResult for Option<T> {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        match self {
            Some(inner) => inner.into_handler_result(),
            None => Ok(HandlerResult::None),
        }
    }
}

impl<T: IntoHandlerResult, E: Into<DispatchError>> IntoHandlerResult for Result<T, E> {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        match self {
            Ok(inner) => inner.into_handler_result(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Serialize any `Serialize` value as a JSON result.
pub struct Json<T: Serialize>(pub T);

impl<T: Serialize> IntoHandlerResult for Json<T> {
    fn into_handler_result(self) -> Result<HandlerResult, DispatchError> {
        serde_json::to_value(self.0)
            .map(HandlerResult::Json)
            .map_err(|e| DispatchError::Internal(format!("failed to serialize handler result: {e}")))
    }
}

// ── Handler spec ────────────────────────────────────────────────────────

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerResult, DispatchError>> + Send>>;

pub type InvokeFn = Arc<dyn Fn(Arc<Context>, ValueMap) -> HandlerFuture + Send + Sync>;

/// A compiled handler: the injection plan plus the monomorphized invoker
/// produced by the handler macros.
#[derive(Clone)]
pub struct HandlerSpec {
    plan: InjectionPlan,
    invoke: InvokeFn,
}

impl HandlerSpec {
    pub fn new(plan: InjectionPlan, invoke: InvokeFn) -> Self {
        Self { plan, invoke }
    }

    pub fn plan(&self) -> &InjectionPlan {
        &self.plan
    }

    pub fn invoke(&self, ctx: Arc<Context>, values: ValueMap) -> HandlerFuture {
        (self.invoke)(ctx, values)
    }

    /// Decompose for wrappers (e.g. result caching) that substitute the
    /// invoker while keeping the plan.
    pub fn into_parts(self) -> (InjectionPlan, InvokeFn) {
        (self.plan, self.invoke)
    }
}

// ── Handler macros ──────────────────────────────────────────────────────

/// Compile an async handler closure into a [`HandlerSpec`].
///
/// Each parameter must name its extraction type: [`Value<T>`] for converted
/// URL-segment/query values, [`Svc<T>`] for container services, or
/// `Arc<Context>` for the active context.
///
/// ```ignore
/// let spec = handler!(async |id: Value<i64>, users: Svc<UserStore>| {
///     Json(users.find(id.0.unwrap_or_default()))
/// });
/// ```
#[macro_export]
macro_rules! handler {
    (async || $body:block) => {{
        let __plan = $crate::di::injection::InjectionPlan::new(::std::vec::Vec::new(), false);
        let __f = move || async move $body;
        let __invoke: $crate::di::injection::InvokeFn = ::std::sync::Arc::new(
            move |__ctx: ::std::sync::Arc<$crate::context::Context>,
                  __values: $crate::di::injection::ValueMap| {
                let _ = (&__ctx, &__values);
                let __f = __f.clone();
                let __fut = __f();
                ::std::boxed::Box::pin(async move {
                    $crate::di::injection::IntoHandlerResult::into_handler_result(__fut.await)
                }) as $crate::di::injection::HandlerFuture
            },
        );
        $crate::di::injection::HandlerSpec::new(__plan, __invoke)
    }};
    (async |$($name:ident : $ty:ty),+ $(,)?| $body:block) => {{
        let __plan = $crate::di::injection::InjectionPlan::new(
            ::std::vec![
                $(<$ty as $crate::di::injection::FromContext>::strategy(::core::stringify!($name))),+
            ],
            false,
        );
        let __f = move |$($name: $ty),+| async move $body;
        let __invoke: $crate::di::injection::InvokeFn = ::std::sync::Arc::new(
            move |__ctx: ::std::sync::Arc<$crate::context::Context>,
                  __values: $crate::di::injection::ValueMap| {
                let __f = __f.clone();
                $(
                    let $name = match <$ty as $crate::di::injection::FromContext>::resolve(
                        ::core::stringify!($name),
                        &__ctx,
                        &__values,
                    ) {
                        ::std::result::Result::Ok(value) => value,
                        ::std::result::Result::Err(err) => {
                            return ::std::boxed::Box::pin(::std::future::ready(
                                ::std::result::Result::Err(err),
                            )) as $crate::di::injection::HandlerFuture;
                        }
                    };
                )+
                let __fut = __f($($name),+);
                ::std::boxed::Box::pin(async move {
                    $crate::di::injection::IntoHandlerResult::into_handler_result(__fut.await)
                }) as $crate::di::injection::HandlerFuture
            },
        );
        $crate::di::injection::HandlerSpec::new(__plan, __invoke)
    }};
}

/// Compile a synchronous handler closure into a [`HandlerSpec`] whose body
/// runs on the blocking worker pool so it never stalls the event loop.
#[macro_export]
macro_rules! blocking_handler {
    (|| $body:block) => {{
        let __plan = $crate::di::injection::InjectionPlan::new(::std::vec::Vec::new(), true);
        let __f = move || $body;
        let __invoke: $crate::di::injection::InvokeFn = ::std::sync::Arc::new(
            move |__ctx: ::std::sync::Arc<$crate::context::Context>,
                  __values: $crate::di::injection::ValueMap| {
                let _ = (&__ctx, &__values);
                let __f = __f.clone();
                ::std::boxed::Box::pin(async move {
                    match ::tokio::task::spawn_blocking(move || __f()).await {
                        ::std::result::Result::Ok(out) => {
                            $crate::di::injection::IntoHandlerResult::into_handler_result(out)
                        }
                        ::std::result::Result::Err(err) => {
                            ::std::result::Result::Err($crate::error::DispatchError::Internal(
                                ::std::format!("blocking handler failed: {err}"),
                            ))
                        }
                    }
                }) as $crate::di::injection::HandlerFuture
            },
        );
        $crate::di::injection::HandlerSpec::new(__plan, __invoke)
    }};
    (|$($name:ident : $ty:ty),+ $(,)?| $body:block) => {{
        let __plan = $crate::di::injection::InjectionPlan::new(
            ::std::vec![
                $(<$ty as $crate::di::injection::FromContext>::strategy(::core::stringify!($name))),+
            ],
            true,
        );
        let __f = move |$($name: $ty),+| $body;
        let __invoke: $crate::di::injection::InvokeFn = ::std::sync::Arc::new(
            move |__ctx: ::std::sync::Arc<$crate::context::Context>,
                  __values: $crate::di::injection::ValueMap| {
                let __f = __f.clone();
                $(
                    let $name = match <$ty as $crate::di::injection::FromContext>::resolve(
                        ::core::stringify!($name),
                        &__ctx,
                        &__values,
                    ) {
                        ::std::result::Result::Ok(value) => value,
                        ::std::result::Result::Err(err) => {
                            return ::std::boxed::Box::pin(::std::future::ready(
                                ::std::result::Result::Err(err),
                            )) as $crate::di::injection::HandlerFuture;
                        }
                    };
                )+
                ::std::boxed::Box::pin(async move {
                    match ::tokio::task::spawn_blocking(move || __f($($name),+)).await {
                        ::std::result::Result::Ok(out) => {
                            $crate::di::injection::IntoHandlerResult::into_handler_result(out)
                        }
                        ::std::result::Result::Err(err) => {
                            ::std::result::Result::Err($crate::error::DispatchError::Internal(
                                ::std::format!("blocking handler failed: {err}"),
                            ))
                        }
                    }
                }) as $crate::di::injection::HandlerFuture
            },
        );
        $crate::di::injection::HandlerSpec::new(__plan, __invoke)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(s: &str) -> ValueEntry {
        ValueEntry::Single(s.to_string())
    }

    #[test]
    fn int_conversion_parses() {
        assert_eq!(i64::from_entry(&single("42")), Some(42));
        assert_eq!(i64::from_entry(&single(" 7 ")), Some(7));
    }

    #[test]
    fn int_conversion_failure_yields_none() {
        assert_eq!(i64::from_entry(&single("forty-two")), None);
        assert_eq!(f64::from_entry(&single("x")), None);
    }

    #[test]
    fn scalar_wraps_into_list() {
        assert_eq!(
            Vec::<String>::from_entry(&single("a")),
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn list_converts_to_set() {
        let entry = ValueEntry::Many(vec!["a".into(), "b".into(), "a".into()]);
        let set = HashSet::<String>::from_entry(&entry).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("a") && set.contains("b"));
    }

    #[test]
    fn plan_flags_value_parameters() {
        let plan = InjectionPlan::new(
            vec![
                ParamStrategy::Service { name: "logger", service: "Logger" },
                ParamStrategy::Value { name: "id", target: ValueTarget::Int },
            ],
            false,
        );
        assert!(plan.has_value_parameters);

        let plan = InjectionPlan::new(
            vec![ParamStrategy::Service { name: "logger", service: "Logger" }],
            false,
        );
        assert!(!plan.has_value_parameters);
        assert!(!plan.is_blocking);
    }
}
