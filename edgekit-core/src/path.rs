//! Dotted-path lookup over JSON trees.
//!
//! Predicates, configuration sections, and generic service factories all
//! address nested values with keys like `database.users.connection_string`.
//! Lookup tries an exact match per level first, then falls back to a
//! case-insensitive scan.

use serde_json::Value;

/// Resolve `path` inside `value`, one dot-separated segment at a time.
///
/// An empty path returns the whole value. A path that leaves the tree (or
/// descends into a non-object) resolves to `None`.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = lookup_key(current, segment)?;
    }
    Some(current)
}

/// Resolve a single key inside a JSON object, case-insensitively.
pub fn lookup_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    if let Some(v) = map.get(key) {
        return Some(v);
    }
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Whether `path` resolves to a non-null value.
pub fn has_path(value: &Value, path: &str) -> bool {
    matches!(lookup_path(value, path), Some(v) if !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "database": {
                "users": { "connection_string": "mongodb://localhost:27017" }
            },
            "Cache": { "Redis": { "Host": "localhost" } }
        })
    }

    #[test]
    fn empty_path_returns_root() {
        let v = sample();
        assert_eq!(lookup_path(&v, ""), Some(&v));
    }

    #[test]
    fn nested_lookup() {
        let v = sample();
        assert_eq!(
            lookup_path(&v, "database.users.connection_string"),
            Some(&json!("mongodb://localhost:27017"))
        );
    }

    #[test]
    fn case_insensitive_fallback() {
        let v = sample();
        assert_eq!(lookup_path(&v, "cache.redis.host"), Some(&json!("localhost")));
    }

    #[test]
    fn missing_path_is_none() {
        let v = sample();
        assert_eq!(lookup_path(&v, "database.products"), None);
        assert_eq!(lookup_path(&v, "database.users.connection_string.deeper"), None);
        assert!(!has_path(&v, "nonexistent.key"));
    }
}
