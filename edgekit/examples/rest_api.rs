//! A small RESTful API with URL-segment injection and a container-managed
//! store.
//!
//! ```sh
//! cargo run --example rest_api
//! curl -X PUT 'http://127.0.0.1:8080/api/users/1?name=lina'
//! curl 'http://127.0.0.1:8080/api/users/1'
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use edgekit::prelude::*;
use edgekit::ListeningOptions;
use serde_json::json;

struct UserStore {
    users: Mutex<HashMap<i64, String>>,
}

impl ServiceKey for UserStore {}

#[tokio::main]
async fn main() -> Result<(), EdgeError> {
    let app = EdgeApp::from_config(AppConfig::from_json_str(
        r#"{"http": "127.0.0.1:8080", "router": "restful", "logger": {"level": "info"}}"#,
    )?)?;

    app.services().add_singleton_instance(UserStore {
        users: Mutex::new(HashMap::new()),
    });

    app.restful_handler(
        Binding::route("api/users/:id").get(),
        handler!(async |id: Value<i64>, store: Svc<UserStore>| {
            let found = {
                let users = store.users.lock().unwrap();
                id.0.and_then(|id| users.get(&id).map(|name| (id, name.clone())))
            };
            match found {
                Some((id, name)) => Ok(Json(json!({"id": id, "name": name}))),
                None => Err(ShortCircuit::not_found("no such user")),
            }
        }),
    );

    app.restful_handler(
        Binding::route("api/users/:id").put(),
        handler!(async |id: Value<i64>, name: Value<String>, store: Svc<UserStore>| {
            let (Some(id), Some(name)) = (id.0, name.0) else {
                return Err(ShortCircuit::bad_request("need a numeric id and a name"));
            };
            store.users.lock().unwrap().insert(id, name.clone());
            Ok(Json(json!({"id": id, "name": name})))
        }),
    );

    app.restful_handler(
        Binding::route("api/users").get(),
        handler!(async |store: Svc<UserStore>| {
            let users = store.users.lock().unwrap();
            let listing: Vec<_> = users
                .iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect();
            Json(json!({"users": listing}))
        }),
    );

    app.listening(ListeningOptions::default()).await
}
