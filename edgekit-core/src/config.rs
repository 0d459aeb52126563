//! Application configuration read at startup.
//!
//! The recognized top-level keys mirror the host options file: `http`, `tcp`,
//! `broker`, `router`, `defaultRouter`, `cache`, and `logger`. Every other
//! subtree (e.g. `database.users`) is retained verbatim and resolved on
//! demand by generic-typed services through [`AppConfig::section`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::EdgeError;
use crate::path::lookup_path;

/// One HTTP endpoint entry: either a bare `host:port` string or an object
/// with an optional TLS block.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HttpEntry {
    Address(String),
    Endpoint(HttpEndpoint),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpEndpoint {
    pub endpoint: String,
    #[serde(default)]
    pub ssl: Option<SslConfig>,
}

/// TLS material for an HTTP endpoint: PEM pair or PFX bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SslConfig {
    Pem { certfile: String, keyfile: String },
    Pfx { pfxfile: String, password: String },
}

/// The `http` key accepts one entry or a list of entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HttpSetting {
    Single(HttpEntry),
    Many(Vec<HttpEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub durable: Option<bool>,
}

/// The `router` key: a fixed context-type tag, or a map from tag to a list
/// of URL regex patterns (`*` is the wildcard).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouterSetting {
    Fixed(String),
    Table(HashMap<String, Vec<String>>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: Option<HttpSetting>,
    #[serde(default)]
    pub tcp: Option<String>,
    #[serde(default)]
    pub broker: Option<BrokerConfig>,
    #[serde(default)]
    pub router: Option<RouterSetting>,
    #[serde(default, rename = "defaultRouter")]
    pub default_router: Option<String>,
    #[serde(default)]
    pub cache: Option<Value>,
    #[serde(default)]
    pub logger: Option<LoggerConfig>,
    #[serde(default)]
    pub name: Option<String>,
    /// When set, error responses embed error details in addition to the log.
    #[serde(default)]
    pub log_error: Option<bool>,
    /// Service-specific subtrees, kept raw for [`AppConfig::section`].
    #[serde(flatten)]
    pub sections: serde_json::Map<String, Value>,
}

impl crate::di::ServiceKey for AppConfig {}

impl AppConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EdgeError> {
        serde_json::from_str(text).map_err(|e| EdgeError::Config(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, EdgeError> {
        serde_yaml::from_str(text).map_err(|e| EdgeError::Config(e.to_string()))
    }

    /// Load a config file, selecting the format from the extension
    /// (`.yaml`/`.yml` vs JSON).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EdgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }

    /// Resolve a dotted key path into the retained sections, e.g.
    /// `config.section("database.users")`. Lookup is case-insensitive per
    /// level.
    pub fn section(&self, path: &str) -> Option<Value> {
        let root = Value::Object(self.sections.clone());
        lookup_path(&root, path).cloned()
    }

    /// The configured HTTP endpoints, normalized to a flat list.
    pub fn http_endpoints(&self) -> Vec<HttpEndpoint> {
        let entries: Vec<HttpEntry> = match &self.http {
            None => Vec::new(),
            Some(HttpSetting::Single(entry)) => vec![entry.clone()],
            Some(HttpSetting::Many(list)) => list.clone(),
        };
        entries
            .into_iter()
            .map(|entry| match entry {
                HttpEntry::Address(endpoint) => HttpEndpoint { endpoint, ssl: None },
                HttpEntry::Endpoint(ep) => ep,
            })
            .collect()
    }
}

// ── Parameterized config services ───────────────────────────────────────

/// Marker naming a configuration subtree, e.g.
/// `impl SectionKey for UsersDb { const PATH: &'static str = "database.users"; }`.
pub trait SectionKey: Send + Sync + 'static {
    const PATH: &'static str;
}

/// The generic origin all [`ConfigFor`] parameterizations resolve through.
/// One factory registration serves every section key; the requested key path
/// reaches the factory as its generic type argument.
pub struct ConfigSlice(pub Value);

impl crate::di::ServiceKey for ConfigSlice {}

/// A configuration subtree selected by a type-level section key.
///
/// ```ignore
/// struct UsersDb;
/// impl SectionKey for UsersDb { const PATH: &'static str = "database.users"; }
///
/// let spec = handler!(async |cfg: Svc<ConfigFor<UsersDb>>| { ... });
/// ```
pub struct ConfigFor<K: SectionKey> {
    value: Value,
    _marker: std::marker::PhantomData<K>,
}

impl<K: SectionKey> ConfigFor<K> {
    pub fn path() -> &'static str {
        K::PATH
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// A dotted sub-path inside this section.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.value, path)
    }
}

impl<K: SectionKey> crate::di::ServiceKey for ConfigFor<K> {
    fn origin() -> std::any::TypeId {
        std::any::TypeId::of::<ConfigSlice>()
    }

    fn service_name() -> &'static str {
        K::PATH
    }

    fn type_args() -> &'static [&'static str] {
        const { &[K::PATH] }
    }

    fn adapt(raw: crate::di::BoxedService) -> Option<crate::di::BoxedService> {
        let slice = raw.downcast::<ConfigSlice>().ok()?;
        Some(std::sync::Arc::new(ConfigFor::<K> {
            value: slice.0.clone(),
            _marker: std::marker::PhantomData,
        }))
    }
}

/// Register the shared [`ConfigSlice`] factory so every `ConfigFor<K>`
/// parameterization resolves through one descriptor. Missing sections are
/// construction failures and propagate as resolution errors.
pub fn register_config_sections(provider: &crate::di::ServiceProvider) {
    provider.add_singleton_factory(|provider, args| {
        let config = provider
            .resolve::<AppConfig>()
            .map_err(|_| crate::error::ResolveError::Construction {
                service: "ConfigSlice",
                message: "AppConfig is not registered".to_string(),
            })?;
        let path = args.generic_type_args.first().copied().unwrap_or("");
        config
            .section(path)
            .map(ConfigSlice)
            .ok_or_else(|| crate::error::ResolveError::Construction {
                service: "ConfigSlice",
                message: format!("config section '{path}' not found"),
            })
    });
}
