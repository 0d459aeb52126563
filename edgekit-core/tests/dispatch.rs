//! End-to-end dispatch: URL segment injection, predicate short-circuits,
//! scoped lifetimes per request, generic config services in handlers, and
//! dynamic handler rebinding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use edgekit_core::config::{register_config_sections, AppConfig, ConfigFor, SectionKey};
use edgekit_core::di::injection::{Svc, Value};
use edgekit_core::di::{ServiceKey, ServiceProvider};
use edgekit_core::dispatcher::{Binding, Dispatcher};
use edgekit_core::error::{ResolveError, ShortCircuit};
use edgekit_core::listener::{Message, ResponseReceiver};
use edgekit_core::context::{Context, ContextFactory, ContextKind};
use edgekit_core::predicate::Predicate;
use edgekit_core::{handler, Json};
use serde_json::json;

fn dispatcher() -> Arc<Dispatcher> {
    Dispatcher::new(ServiceProvider::new(), ContextFactory::auto())
}

fn http_message(method: &str, url: &str, query: &[(&str, &str)]) -> (Message, ResponseReceiver) {
    let mut query_object = serde_json::Map::new();
    for (name, value) in query {
        query_object.insert((*name).to_string(), json!(value));
    }
    let document = json!({
        "cms": {
            "request": {
                "method": method,
                "url": url,
                "rawurl": url,
                "full-url": format!("localhost:8080/{url}"),
                "request-id": "1",
            },
            "query": query_object,
        }
    });
    Message::http(document)
}

async fn send(dispatcher: &Arc<Dispatcher>, method: &str, url: &str) -> edgekit_core::context::envelope::ResponseEnvelope {
    let (message, receiver) = http_message(method, url, &[]);
    dispatcher.on_message_receive(message).await;
    receiver.recv().await.expect("response envelope")
}

fn content_json(envelope: &edgekit_core::context::envelope::ResponseEnvelope) -> serde_json::Value {
    serde_json::from_str(envelope.content().expect("content")).expect("json content")
}

#[tokio::test]
async fn restful_url_segment_injection() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("api/users/:id").get(),
        handler!(async |id: Value<i64>| { Json(json!({"id": id.0})) }),
    );

    let envelope = send(&dispatcher, "get", "api/users/42").await;
    assert_eq!(envelope.header_code(), "200 Ok");
    assert_eq!(envelope.mime(), Some("application/json"));
    assert_eq!(content_json(&envelope), json!({"id": 42}));
}

#[tokio::test]
async fn predicate_short_circuits_to_401() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("admin").predicate(Predicate::callback(|_ctx| async {
            Err(ShortCircuit::unauthorized("admin access required"))
        })),
        handler!(async || { "unreachable" }),
    );

    let envelope = send(&dispatcher, "get", "admin").await;
    assert_eq!(envelope.status(), 401);
    assert_eq!(envelope.header_code(), "401 Unauthorized");
    let body = content_json(&envelope);
    assert_eq!(body["errorCode"], json!("http-401"));
}

#[tokio::test]
async fn scoped_service_constructed_once_per_request() {
    struct Counter;
    impl ServiceKey for Counter {}

    static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

    let provider = ServiceProvider::new();
    provider.add_scoped_factory(|_, _| {
        CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
        Ok(Counter)
    });

    let dispatcher = Dispatcher::new(provider, ContextFactory::auto());
    dispatcher.restful_handler(
        Binding::route("count"),
        handler!(async |first: Svc<Counter>, second: Svc<Counter>| {
            let _ = (first, second);
            "ok"
        }),
    );

    let (message_one, receiver_one) = http_message("get", "count", &[]);
    let (message_two, receiver_two) = http_message("get", "count", &[]);
    tokio::join!(
        dispatcher.on_message_receive(message_one),
        dispatcher.on_message_receive(message_two),
    );
    assert_eq!(receiver_one.recv().await.unwrap().status(), 200);
    assert_eq!(receiver_two.recv().await.unwrap().status(), 200);
    assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn generic_config_service_in_handlers() {
    struct UsersDb;
    struct ProductsDb;
    impl SectionKey for UsersDb {
        const PATH: &'static str = "database.users";
    }
    impl SectionKey for ProductsDb {
        const PATH: &'static str = "database.products";
    }

    let config = AppConfig::from_json_str(
        r#"{
            "database": {
                "users": {"name": "users_db"},
                "products": {"name": "products_db"}
            }
        }"#,
    )
    .unwrap();
    let provider = ServiceProvider::new();
    provider.add_singleton_instance::<AppConfig>(config);
    register_config_sections(&provider);

    let dispatcher = Dispatcher::new(provider, ContextFactory::auto());
    dispatcher.restful_handler(
        Binding::route("users"),
        handler!(async |cfg: Svc<ConfigFor<UsersDb>>| {
            Json(json!({"db": cfg.get("name")}))
        }),
    );
    dispatcher.restful_handler(
        Binding::route("products"),
        handler!(async |cfg: Svc<ConfigFor<ProductsDb>>| {
            Json(json!({"db": cfg.get("name")}))
        }),
    );

    let users = send(&dispatcher, "get", "users").await;
    assert_eq!(content_json(&users), json!({"db": "users_db"}));
    let products = send(&dispatcher, "get", "products").await;
    assert_eq!(content_json(&products), json!({"db": "products_db"}));
}

#[tokio::test]
async fn dynamic_rebind_yields_404_between_versions() {
    let dispatcher = dispatcher();
    assert_eq!(
        dispatcher.factory().detect(Some("localhost:8080/api/users")),
        Some("restful".to_string())
    );

    let v1 = dispatcher.restful_handler(
        Binding::route("api/users"),
        handler!(async || { Json(json!({"version": 1})) }),
    );
    let envelope = send(&dispatcher, "get", "api/users").await;
    assert_eq!(content_json(&envelope), json!({"version": 1}));

    dispatcher.unregister_handler(ContextKind::Restful, Some(v1));
    let envelope = send(&dispatcher, "get", "api/users").await;
    assert_eq!(envelope.status(), 404);
    assert_eq!(
        dispatcher.factory().detect(Some("localhost:8080/api/users")),
        Some("restful".to_string())
    );

    dispatcher.restful_handler(
        Binding::route("api/users"),
        handler!(async || { Json(json!({"version": 2})) }),
    );
    let envelope = send(&dispatcher, "get", "api/users").await;
    assert_eq!(content_json(&envelope), json!({"version": 2}));
    assert_eq!(
        dispatcher.factory().detect(Some("localhost:8080/api/users")),
        Some("restful".to_string())
    );
}

#[tokio::test]
async fn handler_not_found_when_nothing_registered_or_all_reject() {
    let dispatcher = dispatcher();
    let envelope = send(&dispatcher, "get", "missing").await;
    assert_eq!(envelope.status(), 404);
    assert_eq!(content_json(&envelope)["errorCode"], json!("http-404"));

    dispatcher.restful_handler(
        Binding::route("elsewhere"),
        handler!(async || { "never matches" }),
    );
    let envelope = send(&dispatcher, "get", "missing").await;
    assert_eq!(envelope.status(), 404);
}

#[tokio::test]
async fn unregister_all_clears_the_handler_list() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(Binding::route("a"), handler!(async || { "a" }));
    dispatcher.restful_handler(Binding::route("b"), handler!(async || { "b" }));
    assert_eq!(dispatcher.handler_count(ContextKind::Restful), 2);

    dispatcher.unregister_handler(ContextKind::Restful, None);
    assert_eq!(dispatcher.handler_count(ContextKind::Restful), 0);
}

#[tokio::test]
async fn unparseable_int_segment_injects_null() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("items/:num"),
        handler!(async |num: Value<i64>| { Json(json!({"num": num.0})) }),
    );

    let envelope = send(&dispatcher, "get", "items/abc").await;
    assert_eq!(envelope.status(), 200);
    assert_eq!(content_json(&envelope), json!({"num": null}));
}

#[tokio::test]
async fn failing_predicate_expression_is_false_not_fatal() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("guarded").predicate(Predicate::equal("context.no.such.path", "x")),
        handler!(async || { "guarded" }),
    );

    let envelope = send(&dispatcher, "get", "guarded").await;
    assert_eq!(envelope.status(), 404);
}

#[tokio::test]
async fn first_matching_handler_wins_and_none_falls_through() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("pick"),
        handler!(async || { Option::<String>::None }),
    );
    dispatcher.restful_handler(Binding::route("pick"), handler!(async || { "second" }));

    let envelope = send(&dispatcher, "get", "pick").await;
    assert_eq!(envelope.status(), 200);
    assert_eq!(envelope.content(), Some("second"));
}

#[tokio::test]
async fn construction_failure_renders_500() {
    struct Broken;
    impl ServiceKey for Broken {}

    let provider = ServiceProvider::new();
    provider.add_scoped_factory(|_, _| -> Result<Broken, ResolveError> {
        Err(ResolveError::Construction {
            service: "Broken",
            message: "boom".to_string(),
        })
    });
    let dispatcher = Dispatcher::new(provider, ContextFactory::auto());
    dispatcher.restful_handler(
        Binding::route("broken"),
        handler!(async |svc: Svc<Broken>| {
            let _ = svc;
            "unreachable"
        }),
    );

    let envelope = send(&dispatcher, "get", "broken").await;
    assert_eq!(envelope.status(), 500);
}

#[tokio::test]
async fn url_predicate_mutates_only_on_match() {
    let dispatcher = dispatcher();
    let (message, _receiver) = http_message("get", "x", &[]);
    let ctx = dispatcher
        .factory()
        .create_context(&dispatcher, message)
        .unwrap();

    let miss = Predicate::url(":a/:b");
    assert!(!miss.check(&ctx).await.unwrap());
    assert!(ctx.url_segments().is_empty());

    let hit = Predicate::url(":a");
    assert!(hit.check(&ctx).await.unwrap());
    assert_eq!(ctx.url_segments().get("a").map(String::as_str), Some("x"));
}

#[tokio::test]
async fn query_values_reach_predicates_and_handlers() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("search").predicate(Predicate::has_value("context.query.filter")),
        handler!(async |filter: Value<String>| { Json(json!({"filter": filter.0})) }),
    );

    let (message, receiver) = http_message("get", "search", &[("filter", "active")]);
    dispatcher.on_message_receive(message).await;
    let envelope = receiver.recv().await.unwrap();
    assert_eq!(content_json(&envelope), json!({"filter": "active"}));

    // Without the query parameter the predicate rejects.
    let envelope = send(&dispatcher, "get", "search").await;
    assert_eq!(envelope.status(), 404);
}

#[tokio::test]
async fn method_predicates_filter_and_combine() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("users").post(),
        handler!(async || { "created" }),
    );

    let envelope = send(&dispatcher, "post", "users").await;
    assert_eq!(envelope.status(), 200);
    let envelope = send(&dispatcher, "get", "users").await;
    assert_eq!(envelope.status(), 404);

    dispatcher.restful_handler(
        Binding::route("multi").get().put(),
        handler!(async || { "either" }),
    );
    assert_eq!(send(&dispatcher, "get", "multi").await.status(), 200);
    assert_eq!(send(&dispatcher, "put", "multi").await.status(), 200);
    assert_eq!(send(&dispatcher, "delete", "multi").await.status(), 404);
}

#[tokio::test]
async fn context_parameter_receives_the_active_context() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("whoami/:name"),
        handler!(async |ctx: Arc<Context>| {
            let name = ctx.url_segments().get("name").cloned().unwrap_or_default();
            Json(json!({"url": ctx.url(), "name": name}))
        }),
    );

    let envelope = send(&dispatcher, "get", "whoami/zara").await;
    assert_eq!(
        content_json(&envelope),
        json!({"url": "whoami/zara", "name": "zara"})
    );
}

#[tokio::test]
async fn context_is_resolvable_from_its_own_scope() {
    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("self"),
        handler!(async |ctx: Arc<Context>, resolved: Svc<Context>| {
            Json(json!({"same": Arc::ptr_eq(&ctx, &resolved.0)}))
        }),
    );

    let envelope = send(&dispatcher, "get", "self").await;
    assert_eq!(content_json(&envelope), json!({"same": true}));
}

#[tokio::test]
async fn blocking_handlers_run_off_the_event_loop() {
    use edgekit_core::blocking_handler;

    let dispatcher = dispatcher();
    dispatcher.restful_handler(
        Binding::route("sync/:id"),
        blocking_handler!(|id: Value<i64>| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            Json(json!({"id": id.0}))
        }),
    );

    let envelope = send(&dispatcher, "get", "sync/9").await;
    assert_eq!(content_json(&envelope), json!({"id": 9}));
}
