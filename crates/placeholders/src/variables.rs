//! `{{ name }}` variable substitution.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn variable_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}")
            .map_err(|e| tracing::error!(error = %e, "variable pattern failed to compile"))
            .ok()
    })
    .as_ref()
}

/// Replace every `{{ name }}` whose name is present in `variables`.
/// Unknown placeholders are left untouched.
pub fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    let Some(re) = variable_regex() else {
        return text.to_owned();
    };
    if variables.is_empty() {
        return text.to_owned();
    }
    re.replace_all(text, |caps: &Captures<'_>| match variables.get(&caps[1]) {
        Some(value) => value.clone(),
        None => caps[0].to_owned(),
    })
    .into_owned()
}
