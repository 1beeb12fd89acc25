//! Environment variable loading with alias fallback.
//!
//! Every helper has a `*_with` form taking a [`Lookup`] so resolution can be
//! exercised without touching the process environment.

use std::env;

/// Source of environment values.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Primary key first, then aliases in order. Blank values count as unset.
pub fn env_optional_with(lookup: Lookup<'_>, primary: &str, aliases: &[&str]) -> Option<String> {
    std::iter::once(primary)
        .chain(aliases.iter().copied())
        .filter_map(|k| lookup(k))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env_optional_with(&process_env, primary, aliases)
}

/// Like [`env_optional`], falling back to `default` when unset.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env_optional(primary, aliases).unwrap_or_else(default)
}

/// 1/true/yes/on → true, 0/false/no/off → false; anything else keeps `default`.
pub fn env_bool_with(lookup: Lookup<'_>, primary: &str, aliases: &[&str], default: bool) -> bool {
    match env_optional_with(lookup, primary, aliases)
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    env_bool_with(&process_env, primary, aliases, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_optional_prefers_primary_then_alias() {
        let vars = table(&[("ALIAS", "b")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(env_optional_with(&lookup, "PRIMARY", &["ALIAS"]), Some("b".into()));

        let vars = table(&[("PRIMARY", "a"), ("ALIAS", "b")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(env_optional_with(&lookup, "PRIMARY", &["ALIAS"]), Some("a".into()));
    }

    #[test]
    fn test_blank_value_is_unset() {
        let vars = table(&[("PRIMARY", "   "), ("ALIAS", "x")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(env_optional_with(&lookup, "PRIMARY", &["ALIAS"]), Some("x".into()));
    }

    #[test]
    fn test_bool_parsing() {
        let vars = table(&[("A", "Yes"), ("B", "off"), ("C", "maybe")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert!(env_bool_with(&lookup, "A", &[], false));
        assert!(!env_bool_with(&lookup, "B", &[], true));
        assert!(env_bool_with(&lookup, "C", &[], true));
        assert!(!env_bool_with(&lookup, "MISSING", &[], false));
    }
}
