//! Variable Resolver
//!
//! Substitutes `{{name}}` tokens through a config tree. Resolution is
//! best-effort: a token naming an absent variable is left in place verbatim.
//! Checking a variable set against a template's required list is a separate,
//! explicit operation (`validate`).

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::catalog::required_variables;
use super::value::{ConfigMap, ConfigValue};

/// Caller-supplied variables, keyed by token name
pub type VariableSet = ConfigMap;

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        // Pattern is a literal; failure here is a programming error.
        Regex::new(r"\{\{([^}]+)\}\}").unwrap_or_else(|e| panic!("invalid token pattern: {e}"))
    })
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves every token in `value` against `variables`.
///
/// Mappings and sequences are walked structurally. A string that consists of
/// exactly one token whose variable is present takes the variable's typed value
/// (so `"{{duration}}"` with `duration = 8` yields the integer 8). Any other
/// string has each present token replaced by the variable's text form.
pub fn resolve(value: &ConfigValue, variables: &VariableSet) -> ConfigValue {
    match value {
        ConfigValue::String(s) => resolve_str(s, variables),
        ConfigValue::Mapping(map) => ConfigValue::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, variables)))
                .collect(),
        ),
        ConfigValue::Sequence(items) => {
            ConfigValue::Sequence(items.iter().map(|v| resolve(v, variables)).collect())
        }
        other => other.clone(),
    }
}

/// Resolves a single string.
pub fn resolve_str(input: &str, variables: &VariableSet) -> ConfigValue {
    let re = token_regex();

    if let Some(caps) = re.captures(input) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole.len() == input.len() {
            let key = caps[1].trim();
            if let Some(v) = variables.get(key) {
                return v.clone();
            }
            return ConfigValue::String(input.to_string());
        }
    } else {
        return ConfigValue::String(input.to_string());
    }

    let replaced = re.replace_all(input, |caps: &Captures<'_>| {
        let key = caps[1].trim();
        match variables.get(key) {
            Some(v) => v.to_interpolated(),
            None => caps[0].to_string(),
        }
    });
    ConfigValue::String(replaced.into_owned())
}

/// Collects the distinct token names referenced anywhere in `value`.
pub fn referenced_tokens(value: &ConfigValue) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_tokens(value, &mut names);
    names
}

fn collect_tokens(value: &ConfigValue, out: &mut BTreeSet<String>) {
    match value {
        ConfigValue::String(s) => {
            for caps in token_regex().captures_iter(s) {
                out.insert(caps[1].trim().to_string());
            }
        }
        ConfigValue::Mapping(map) => map.values().for_each(|v| collect_tokens(v, out)),
        ConfigValue::Sequence(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        _ => {}
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Outcome of checking a variable set against a template's required list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub missing: Vec<String>,
    pub required: Vec<String>,
    pub provided: Vec<String>,
}

/// Compares supplied variable names with the catalog's required list for
/// `template_id`. Never inspects the template body; an unknown template has
/// no requirements.
///
/// A variable counts as supplied when it is present, non-null and not an
/// empty string.
pub fn validate(template_id: &str, variables: &VariableSet) -> ValidationReport {
    let required: Vec<String> = required_variables(template_id)
        .iter()
        .map(|s| s.to_string())
        .collect();

    let missing: Vec<String> = required
        .iter()
        .filter(|name| !variables.get(name.as_str()).is_some_and(is_supplied))
        .cloned()
        .collect();

    ValidationReport {
        valid: missing.is_empty(),
        missing,
        required,
        provided: variables.keys().cloned().collect(),
    }
}

fn is_supplied(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Null => false,
        ConfigValue::String(s) => !s.is_empty(),
        _ => true,
    }
}
