//! URL template compilation
//!
//! `/api/orders/{id}/lines/{line}` becomes an anchored regex with one named
//! capture per placeholder. A placeholder written as the final `/{name}`
//! segment is optional: the path matches with or without it.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

/// Compiled matcher for one URL template
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    template: String,
    regex: Option<Regex>,
}

/// Split a template into literal text and `{name}` placeholders
fn segments(template: &str) -> Vec<(bool, &str)> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        if open > 0 {
            parts.push((false, &rest[..open]));
        }
        parts.push((true, &rest[open + 1..close]));
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        parts.push((false, rest));
    }

    parts
}

/// Build the regex source for `template`
#[must_use]
pub fn compile_pattern(template: &str) -> String {
    let trimmed = template.trim_end_matches('/');
    let mut parts = segments(trimmed);

    // A trailing "/{name}" becomes an optional, non-capturing group.
    let tail = match parts.as_slice() {
        [.., (false, literal), (true, name)] if literal.ends_with('/') => Some((*literal, *name)),
        _ => None,
    };
    let mut optional_tail = None;
    if let Some((literal, name)) = tail {
        parts.truncate(parts.len() - 2);
        let literal = literal.trim_end_matches('/');
        if !literal.is_empty() {
            parts.push((false, literal));
        }
        optional_tail = Some(name);
    }

    let mut pattern = String::from("^");
    for (is_placeholder, text) in parts {
        if is_placeholder {
            pattern.push_str(&format!("(?P<{text}>[^/]+)"));
        } else {
            pattern.push_str(&regex::escape(text));
        }
    }
    if let Some(name) = optional_tail {
        pattern.push_str(&format!("(?:/(?P<{name}>[^/]+))?"));
    }
    pattern.push_str("/?$");
    pattern
}

impl RouteMatcher {
    /// Compile `template`.
    ///
    /// A template that does not produce a valid regex yields a matcher that
    /// never matches.
    #[must_use]
    pub fn compile(template: &str) -> Self {
        let pattern = compile_pattern(template);
        let regex = match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(template, error = %e, "URL template does not compile; endpoint will never match");
                None
            }
        };

        Self {
            template: template.to_string(),
            regex,
        }
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// Match a request path, returning the percent-decoded captures.
    ///
    /// An optional trailing placeholder that was not supplied is absent
    /// from the map.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let regex = self.regex.as_ref()?;
        let captures = regex.captures(path)?;

        let values = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                let raw = captures.name(name)?.as_str();
                let value = urlencoding::decode(raw)
                    .map_or_else(|_| raw.to_string(), |decoded| decoded.into_owned());
                Some((name.to_string(), value))
            })
            .collect();

        Some(values)
    }
}
