//! Error taxonomy: short-circuit errors, DI resolution errors, and the
//! dispatch-level error that the dispatcher turns into protocol responses.

use std::fmt;

/// HTTP-shaped status code strings carried in the `cms.webserver.headercode`
/// field of response envelopes.
pub mod status {
    pub const OK: &str = "200 Ok";
    pub const BAD_REQUEST: &str = "400 Bad Request";
    pub const UNAUTHORIZED: &str = "401 Unauthorized";
    pub const FORBIDDEN: &str = "403 Forbidden";
    pub const NOT_FOUND: &str = "404 Not Found";
    pub const METHOD_NOT_ALLOWED: &str = "405 Method Not Allowed";
    pub const INTERNAL_SERVER_ERROR: &str = "500 Internal Server Error";

    /// Numeric part of a status string (`"401 Unauthorized"` -> `401`).
    pub fn as_u16(code: &str) -> u16 {
        code.split(' ')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500)
    }
}

/// A structured error that aborts predicate evaluation and handler matching
/// and is rendered directly as a protocol response.
///
/// Predicates and handlers raise these to answer with a specific status
/// instead of falling through to the next handler.
#[derive(Debug, Clone)]
pub struct ShortCircuit {
    pub status_code: &'static str,
    pub error_code: &'static str,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl ShortCircuit {
    fn new(status_code: &'static str, error_code: &'static str, message: Option<String>) -> Self {
        Self {
            status_code,
            error_code,
            message,
            data: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(status::BAD_REQUEST, "http-400", Some(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(status::UNAUTHORIZED, "http-401", Some(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(status::FORBIDDEN, "http-403", Some(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(status::NOT_FOUND, "http-404", Some(message.into()))
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(status::METHOD_NOT_ALLOWED, "http-405", Some(message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(status::INTERNAL_SERVER_ERROR, "http-500", Some(message.into()))
    }

    /// The 404 raised when no registered handler accepts a context.
    pub fn handler_not_found(context_type: &str) -> Self {
        Self::not_found(format!("Suitable handler not found for {context_type}!"))
    }

    /// Attach structured data rendered verbatim as the error body.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ShortCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} ({}): {}", self.status_code, self.error_code, msg),
            None => write!(f, "{} ({})", self.status_code, self.error_code),
        }
    }
}

impl std::error::Error for ShortCircuit {}

/// Errors raised while resolving a service from the DI container.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// No descriptor is registered for the requested key type.
    NotRegistered { service: &'static str },
    /// The descriptor produced a value that is not of the requested type.
    TypeMismatch { service: &'static str },
    /// A factory or constructor failed.
    Construction { service: &'static str, message: String },
    /// Constructor injection re-entered a type already under construction.
    CircularDependency { path: Vec<&'static str> },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotRegistered { service } => {
                write!(f, "Service '{service}' is not registered")
            }
            ResolveError::TypeMismatch { service } => {
                write!(f, "Registered provider for '{service}' produced a value of the wrong type")
            }
            ResolveError::Construction { service, message } => {
                write!(f, "Failed to construct service '{service}': {message}")
            }
            ResolveError::CircularDependency { path } => {
                write!(f, "Circular service dependency detected: {}", path.join(" -> "))
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Errors surfaced while dispatching a message to a handler.
///
/// Every variant is eventually rendered through
/// [`Context::generate_error_response`](crate::context::Context::generate_error_response):
/// short-circuits keep their status and code, everything else becomes a 500.
#[derive(Debug)]
pub enum DispatchError {
    ShortCircuit(ShortCircuit),
    Resolve(ResolveError),
    /// No context type could be derived for an inbound message.
    ContextType { url: Option<String>, tag: Option<String> },
    Internal(String),
}

impl DispatchError {
    pub fn status_code(&self) -> &'static str {
        match self {
            DispatchError::ShortCircuit(sc) => sc.status_code,
            _ => status::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::ShortCircuit(sc) => write!(f, "{sc}"),
            DispatchError::Resolve(err) => write!(f, "{err}"),
            DispatchError::ContextType { url, tag } => match tag {
                Some(tag) => write!(
                    f,
                    "Configured context type '{tag}' not found for '{}'",
                    url.as_deref().unwrap_or("")
                ),
                None => {
                    write!(f, "No context found for '{}'", url.as_deref().unwrap_or(""))
                }
            },
            DispatchError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ShortCircuit> for DispatchError {
    fn from(err: ShortCircuit) -> Self {
        DispatchError::ShortCircuit(err)
    }
}

impl From<ResolveError> for DispatchError {
    fn from(err: ResolveError) -> Self {
        DispatchError::Resolve(err)
    }
}

/// Framework-level error for configuration, startup, and listener failures.
#[derive(Debug)]
pub enum EdgeError {
    Config(String),
    Listener(String),
    Resolve(ResolveError),
    Io(std::io::Error),
}

impl fmt::Display for EdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeError::Config(msg) => write!(f, "Configuration error: {msg}"),
            EdgeError::Listener(msg) => write!(f, "Listener error: {msg}"),
            EdgeError::Resolve(err) => write!(f, "{err}"),
            EdgeError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for EdgeError {}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        EdgeError::Io(err)
    }
}

impl From<ResolveError> for EdgeError {
    fn from(err: ResolveError) -> Self {
        EdgeError::Resolve(err)
    }
}
