//! URL pattern matching with segment capture.
//!
//! Patterns are slash-separated: a literal segment matches
//! case-insensitively, `:name` captures one segment, and a trailing `:*name`
//! captures the remainder slash-joined. On a match the captures replace the
//! context's URL segments; a failing match leaves the context untouched.

use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Capture(String),
}

#[derive(Debug, Clone)]
pub struct UrlMatcher {
    segments: Vec<Segment>,
    /// Name of the trailing `:*name` capture, if any.
    tail: Option<String>,
}

impl UrlMatcher {
    pub fn compile(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('/').collect();
        let last = parts.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(parts.len());
        let mut tail = None;
        for (index, part) in parts.iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                if index == last {
                    if let Some(rest_name) = name.strip_prefix('*') {
                        tail = Some(rest_name.to_string());
                        continue;
                    }
                }
                segments.push(Segment::Capture(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_ascii_lowercase()));
            }
        }
        Self { segments, tail }
    }

    /// Match a URL, returning the captured segments on success.
    pub fn matches(&self, url: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = url.split('/').collect();
        match self.tail {
            Some(_) if parts.len() < self.segments.len() => return None,
            None if parts.len() != self.segments.len() => return None,
            _ => {}
        }

        let mut captures = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(literal) => {
                    if !part.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    captures.insert(name.clone(), (*part).to_string());
                }
            }
        }
        if let Some(name) = &self.tail {
            let rest = parts[self.segments.len()..].join("/");
            captures.insert(name.clone(), rest);
        }
        Some(captures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match_is_case_insensitive() {
        let matcher = UrlMatcher::compile("api/users");
        assert!(matcher.matches("API/Users").is_some());
        assert!(matcher.matches("api/other").is_none());
    }

    #[test]
    fn captures_named_segments() {
        let matcher = UrlMatcher::compile("api/users/:id");
        let captures = matcher.matches("api/users/42").unwrap();
        assert_eq!(captures.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn length_mismatch_fails() {
        let matcher = UrlMatcher::compile(":a/:b");
        assert!(matcher.matches("x").is_none());
        assert!(matcher.matches("x/y/z").is_none());
    }

    #[test]
    fn trailing_star_captures_remainder() {
        let matcher = UrlMatcher::compile("files/:*path");
        let captures = matcher.matches("files/a/b/c.txt").unwrap();
        assert_eq!(captures.get("path").map(String::as_str), Some("a/b/c.txt"));

        let captures = matcher.matches("files").unwrap();
        assert_eq!(captures.get("path").map(String::as_str), Some(""));
    }

    #[test]
    fn mixed_literals_and_captures() {
        let matcher = UrlMatcher::compile("orgs/:org/users/:id");
        let captures = matcher.matches("orgs/acme/users/7").unwrap();
        assert_eq!(captures.get("org").map(String::as_str), Some("acme"));
        assert_eq!(captures.get("id").map(String::as_str), Some("7"));
    }
}
