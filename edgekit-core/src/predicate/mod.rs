//! Predicate algebra: async boolean decisions over a context.
//!
//! A predicate either accepts, rejects, or short-circuits with a structured
//! error that becomes the response. Expression evaluation errors never
//! escape — an unresolvable path simply rejects.

mod expression;
mod url;

pub use expression::PathExpr;
pub use url::UrlMatcher;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::context::Context;
use crate::error::ShortCircuit;

type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ShortCircuit>> + Send + 'a>>;

type CallbackFn =
    Arc<dyn Fn(Arc<Context>) -> Pin<Box<dyn Future<Output = Result<bool, ShortCircuit>> + Send>> + Send + Sync>;

enum Kind {
    Equal { expr: PathExpr, value: Value },
    NotEqual { expr: PathExpr, value: Value },
    InList { expr: PathExpr, items: Vec<Value> },
    GreaterThan { expr: PathExpr, value: f64 },
    GreaterThanEqual { expr: PathExpr, value: f64 },
    LessThan { expr: PathExpr, value: f64 },
    LessThanEqual { expr: PathExpr, value: f64 },
    Between { expr: PathExpr, low: f64, high: f64 },
    Match { expr: PathExpr, pattern: Regex },
    HasValue { expr: PathExpr },
    Url(UrlMatcher),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Callback(CallbackFn),
}

/// An async boolean guard evaluated against a context before its handler.
#[derive(Clone)]
pub struct Predicate {
    kind: Arc<Kind>,
}

impl Predicate {
    fn from_kind(kind: Kind) -> Self {
        Self { kind: Arc::new(kind) }
    }

    pub fn equal(expression: &str, value: impl Into<Value>) -> Self {
        Self::from_kind(Kind::Equal {
            expr: PathExpr::compile(expression),
            value: value.into(),
        })
    }

    pub fn not_equal(expression: &str, value: impl Into<Value>) -> Self {
        Self::from_kind(Kind::NotEqual {
            expr: PathExpr::compile(expression),
            value: value.into(),
        })
    }

    pub fn in_list<I, V>(expression: &str, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_kind(Kind::InList {
            expr: PathExpr::compile(expression),
            items: items.into_iter().map(Into::into).collect(),
        })
    }

    pub fn greater_than(expression: &str, value: f64) -> Self {
        Self::from_kind(Kind::GreaterThan {
            expr: PathExpr::compile(expression),
            value,
        })
    }

    pub fn greater_than_equal(expression: &str, value: f64) -> Self {
        Self::from_kind(Kind::GreaterThanEqual {
            expr: PathExpr::compile(expression),
            value,
        })
    }

    pub fn less_than(expression: &str, value: f64) -> Self {
        Self::from_kind(Kind::LessThan {
            expr: PathExpr::compile(expression),
            value,
        })
    }

    pub fn less_than_equal(expression: &str, value: f64) -> Self {
        Self::from_kind(Kind::LessThanEqual {
            expr: PathExpr::compile(expression),
            value,
        })
    }

    pub fn between(expression: &str, low: f64, high: f64) -> Self {
        Self::from_kind(Kind::Between {
            expr: PathExpr::compile(expression),
            low,
            high,
        })
    }

    /// Regex match over the expression's string value. An invalid pattern
    /// rejects every context rather than failing registration.
    pub fn matches(expression: &str, pattern: &str) -> Self {
        let compiled = Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").unwrap());
        Self::from_kind(Kind::Match {
            expr: PathExpr::compile(expression),
            pattern: compiled,
        })
    }

    /// Truthy and, for strings, non-blank.
    pub fn has_value(expression: &str) -> Self {
        Self::from_kind(Kind::HasValue {
            expr: PathExpr::compile(expression),
        })
    }

    /// URL pattern with `:name` segment captures; on a match the captures
    /// are stored into the context's URL segments.
    pub fn url(pattern: &str) -> Self {
        Self::from_kind(Kind::Url(UrlMatcher::compile(pattern)))
    }

    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self::from_kind(Kind::All(predicates))
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self::from_kind(Kind::Any(predicates))
    }

    /// Arbitrary async boolean over the context. May short-circuit by
    /// returning `Err`.
    pub fn callback<F, Fut>(callback: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, ShortCircuit>> + Send + 'static,
    {
        let callback: CallbackFn = Arc::new(move |ctx| Box::pin(callback(ctx)));
        Self::from_kind(Kind::Callback(callback))
    }

    /// HTTP method guard over the request envelope.
    pub fn is_method(method: &str) -> Self {
        Self::equal("context.cms.request.method", method.to_ascii_lowercase())
    }

    /// Evaluate against a context. `Err` short-circuits handler matching.
    pub fn check<'a>(&'a self, ctx: &'a Arc<Context>) -> CheckFuture<'a> {
        Box::pin(async move {
            match &*self.kind {
                Kind::Equal { expr, value } => {
                    Ok(expr.evaluate(ctx).map(|v| loose_eq(&v, value)).unwrap_or(false))
                }
                Kind::NotEqual { expr, value } => {
                    Ok(expr.evaluate(ctx).map(|v| !loose_eq(&v, value)).unwrap_or(false))
                }
                Kind::InList { expr, items } => Ok(expr
                    .evaluate(ctx)
                    .map(|v| items.iter().any(|item| loose_eq(&v, item)))
                    .unwrap_or(false)),
                Kind::GreaterThan { expr, value } => {
                    Ok(expr.evaluate_number(ctx).map(|n| n > *value).unwrap_or(false))
                }
                Kind::GreaterThanEqual { expr, value } => {
                    Ok(expr.evaluate_number(ctx).map(|n| n >= *value).unwrap_or(false))
                }
                Kind::LessThan { expr, value } => {
                    Ok(expr.evaluate_number(ctx).map(|n| n < *value).unwrap_or(false))
                }
                Kind::LessThanEqual { expr, value } => {
                    Ok(expr.evaluate_number(ctx).map(|n| n <= *value).unwrap_or(false))
                }
                Kind::Between { expr, low, high } => Ok(expr
                    .evaluate_number(ctx)
                    .map(|n| n >= *low && n <= *high)
                    .unwrap_or(false)),
                Kind::Match { expr, pattern } => Ok(expr
                    .evaluate(ctx)
                    .and_then(|v| v.as_str().map(|s| pattern.is_match(s)))
                    .unwrap_or(false)),
                Kind::HasValue { expr } => Ok(expr
                    .evaluate(ctx)
                    .map(|v| match v {
                        Value::Null => false,
                        Value::String(s) => !s.trim().is_empty(),
                        Value::Bool(b) => b,
                        Value::Array(items) => !items.is_empty(),
                        Value::Object(map) => !map.is_empty(),
                        Value::Number(_) => true,
                    })
                    .unwrap_or(false)),
                Kind::Url(matcher) => match ctx.url().and_then(|url| matcher.matches(url)) {
                    Some(captures) => {
                        if !captures.is_empty() {
                            ctx.set_url_segments(captures);
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                },
                Kind::All(predicates) => {
                    for predicate in predicates {
                        if !predicate.check(ctx).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Kind::Any(predicates) => {
                    for predicate in predicates {
                        if predicate.check(ctx).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Kind::Callback(callback) => callback(ctx.clone()).await,
            }
        })
    }
}

/// JSON comparison that tolerates the string-typed values URL and query
/// parsing produce: `"42" == 42` and case-insensitive string equality.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => l.eq_ignore_ascii_case(r),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .is_some_and(|(a, b)| a == b),
        _ => false,
    }
}

/// Combine decorator arguments into a predicate list: the URL pattern if
/// present, then the method guard (a set of methods is a disjunction), then
/// the caller's extra predicates.
pub fn build_predicates(
    route: Option<&str>,
    methods: &[&str],
    extras: Vec<Predicate>,
) -> Vec<Predicate> {
    let mut combined = Vec::with_capacity(extras.len() + 2);
    if let Some(route) = route {
        combined.push(Predicate::url(route));
    }
    match methods {
        [] => {}
        [single] => combined.push(Predicate::is_method(single)),
        many => combined.push(Predicate::any(
            many.iter().map(|m| Predicate::is_method(m)).collect(),
        )),
    }
    combined.extend(extras);
    combined
}
