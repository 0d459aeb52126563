//! Predicate algebra over real contexts.

use std::sync::Arc;

use edgekit_core::context::{Context, ContextFactory};
use edgekit_core::di::ServiceProvider;
use edgekit_core::dispatcher::Dispatcher;
use edgekit_core::listener::Message;
use edgekit_core::predicate::Predicate;
use serde_json::json;

async fn context_for(query: serde_json::Value) -> Arc<Context> {
    let dispatcher = Dispatcher::new(ServiceProvider::new(), ContextFactory::auto());
    let (message, _receiver) = Message::http(json!({
        "cms": {
            "request": {
                "method": "get",
                "url": "api/items",
                "full-url": "localhost:8080/api/items",
                "request-id": "1",
            },
            "query": query,
        }
    }));
    dispatcher
        .factory()
        .create_context(&dispatcher, message)
        .unwrap()
}

async fn accepts(predicate: Predicate, ctx: &Arc<Context>) -> bool {
    predicate.check(ctx).await.unwrap()
}

#[tokio::test]
async fn equality_is_string_tolerant() {
    let ctx = context_for(json!({"page": "3", "kind": "Admin"})).await;
    assert!(accepts(Predicate::equal("context.query.page", 3), &ctx).await);
    assert!(accepts(Predicate::equal("context.query.kind", "admin"), &ctx).await);
    assert!(accepts(Predicate::not_equal("context.query.kind", "user"), &ctx).await);
    assert!(!accepts(Predicate::equal("context.query.missing", "x"), &ctx).await);
}

#[tokio::test]
async fn numeric_comparisons_parse_strings() {
    let ctx = context_for(json!({"age": "42"})).await;
    assert!(accepts(Predicate::greater_than("context.query.age", 40.0), &ctx).await);
    assert!(accepts(Predicate::greater_than_equal("context.query.age", 42.0), &ctx).await);
    assert!(accepts(Predicate::less_than("context.query.age", 50.0), &ctx).await);
    assert!(accepts(Predicate::less_than_equal("context.query.age", 42.0), &ctx).await);
    assert!(accepts(Predicate::between("context.query.age", 40.0, 45.0), &ctx).await);
    assert!(!accepts(Predicate::between("context.query.age", 0.0, 10.0), &ctx).await);
    // A non-numeric value rejects instead of failing.
    let ctx = context_for(json!({"age": "old"})).await;
    assert!(!accepts(Predicate::greater_than("context.query.age", 1.0), &ctx).await);
}

#[tokio::test]
async fn membership_and_regex() {
    let ctx = context_for(json!({"status": "active"})).await;
    assert!(accepts(Predicate::in_list("context.query.status", ["active", "pending"]), &ctx).await);
    assert!(!accepts(Predicate::in_list("context.query.status", ["archived"]), &ctx).await);
    assert!(accepts(Predicate::matches("context.query.status", "^act"), &ctx).await);
    assert!(!accepts(Predicate::matches("context.query.status", "^x"), &ctx).await);
}

#[tokio::test]
async fn has_value_requires_non_blank() {
    let ctx = context_for(json!({"filled": "yes", "blank": "  "})).await;
    assert!(accepts(Predicate::has_value("context.query.filled"), &ctx).await);
    assert!(!accepts(Predicate::has_value("context.query.blank"), &ctx).await);
    assert!(!accepts(Predicate::has_value("context.query.absent"), &ctx).await);
}

#[tokio::test]
async fn combinators_compose() {
    let ctx = context_for(json!({"a": "1", "b": "2"})).await;
    let both = Predicate::all(vec![
        Predicate::equal("context.query.a", "1"),
        Predicate::equal("context.query.b", "2"),
    ]);
    assert!(accepts(both, &ctx).await);

    let either = Predicate::any(vec![
        Predicate::equal("context.query.a", "9"),
        Predicate::equal("context.query.b", "2"),
    ]);
    assert!(accepts(either, &ctx).await);

    let neither = Predicate::any(vec![
        Predicate::equal("context.query.a", "9"),
        Predicate::equal("context.query.b", "9"),
    ]);
    assert!(!accepts(neither, &ctx).await);
}

#[tokio::test]
async fn method_guard_reads_the_envelope() {
    let ctx = context_for(json!({})).await;
    assert!(accepts(Predicate::is_method("GET"), &ctx).await);
    assert!(!accepts(Predicate::is_method("POST"), &ctx).await);
}

#[tokio::test]
async fn callback_predicates_decide_asynchronously() {
    let ctx = context_for(json!({})).await;
    let yes = Predicate::callback(|ctx| async move { Ok(ctx.url().is_some()) });
    assert!(accepts(yes, &ctx).await);
}
