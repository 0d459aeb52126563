//! Compiled dotted-path expressions over a context.
//!
//! An expression like `context.query.filter` is split once at predicate
//! construction; evaluation is a segment walk via [`Context::lookup`].
//! Evaluation never fails — unresolvable paths yield `None`.

use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;

#[derive(Debug, Clone)]
pub struct PathExpr {
    segments: Vec<String>,
}

impl PathExpr {
    /// Compile an expression rooted at `context`. The leading `context`
    /// segment is optional and stripped.
    pub fn compile(expression: &str) -> Self {
        let mut segments: Vec<String> = expression
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.first().is_some_and(|s| s.eq_ignore_ascii_case("context")) {
            segments.remove(0);
        }
        Self { segments }
    }

    pub fn evaluate(&self, ctx: &Arc<Context>) -> Option<Value> {
        ctx.lookup(&self.segments)
    }

    /// Evaluate to a number for the comparison predicates.
    pub fn evaluate_number(&self, ctx: &Arc<Context>) -> Option<f64> {
        match self.evaluate(ctx)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
