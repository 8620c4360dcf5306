//! Template resolution and request expansion
//!
//! `{{.Key}}` placeholders are resolved when requests are built; `[[.Key]]`
//! placeholders survive that pass and are resolved right before sending, so
//! they can pick up values written by earlier requests.

mod builder;
mod variables;

pub use builder::{build, build_plain};
pub use variables::{evaluate_source, expand, random_string, VariableRow};

use crate::signature::Target;

const PRIMARY: (&str, &str) = ("{{", "}}");
const ALTERNATE: (&str, &str) = ("[[", "]]");

/// Resolve `{{.Key}}` placeholders
///
/// Unknown keys render empty. Placeholders that are not a plain `.Key`
/// reference are left untouched. An unclosed placeholder returns the input
/// unchanged.
pub fn resolve(format: &str, vars: &Target) -> String {
    render(format, vars, PRIMARY)
}

/// Resolve `[[.Key]]` placeholders
pub fn alt_resolve(format: &str, vars: &Target) -> String {
    render(format, vars, ALTERNATE)
}

fn render(format: &str, vars: &Target, (open, close): (&str, &str)) -> String {
    if !format.contains(open) {
        return format.to_string();
    }

    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(close) else {
            tracing::debug!(template = format, "Unclosed placeholder, leaving template as is");
            return format.to_string();
        };

        let inner = &after[..end];
        match placeholder_key(inner) {
            Some(key) => out.push_str(vars.get(key).map(String::as_str).unwrap_or("")),
            None => {
                out.push_str(open);
                out.push_str(inner);
                out.push_str(close);
            }
        }
        rest = &after[end + close.len()..];
    }

    out.push_str(rest);
    out
}

fn placeholder_key(inner: &str) -> Option<&str> {
    let key = inner.trim().strip_prefix('.')?;
    let valid = !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(key)
}

/// Resolve every string in a list
pub fn resolve_all(items: &[String], vars: &Target) -> Vec<String> {
    items.iter().map(|item| resolve(item, vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Target {
        let mut vars = Target::new();
        vars.insert("Host".into(), "example.com".into());
        vars.insert("Path".into(), "/admin".into());
        vars.insert("token".into(), "[[.x]] {{ not }}".into());
        vars
    }

    #[test]
    fn test_literal_passthrough() {
        assert_eq!(resolve("GET / HTTP/1.1", &vars()), "GET / HTTP/1.1");
    }

    #[test]
    fn test_substitutions() {
        assert_eq!(resolve("https://{{.Host}}{{.Path}}", &vars()), "https://example.com/admin");
        assert_eq!(resolve("{{ .Host }}", &vars()), "example.com");
    }

    #[test]
    fn test_unknown_key_is_empty() {
        assert_eq!(resolve("a{{.missing}}b", &vars()), "ab");
    }

    #[test]
    fn test_foreign_placeholders_untouched() {
        assert_eq!(resolve("{{payload}} [[.Host]] {{.Host}}", &vars()), "{{payload}} [[.Host]] example.com");
    }

    #[test]
    fn test_unclosed_returns_original() {
        assert_eq!(resolve("{{.Host}} {{.Path", &vars()), "{{.Host}} {{.Path");
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let once = resolve("t={{.token}}", &vars());
        assert_eq!(once, "t=[[.x]] {{ not }}");
        assert_eq!(resolve(&once, &vars()), once);
    }

    #[test]
    fn test_idempotent() {
        let s = "{{.Host}}/{{.Path}}?q={{.nothing}}&{{raw}}";
        let once = resolve(s, &vars());
        assert_eq!(resolve(&once, &vars()), once);
    }

    #[test]
    fn test_alt_resolve() {
        assert_eq!(alt_resolve("{{.Host}}[[.Host]]", &vars()), "{{.Host}}example.com");
    }
}
