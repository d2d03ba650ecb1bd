use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ModelError;

/// Variable bindings visible to a step: data row values, loop counters and
/// values captured at runtime with `GetText`.
pub type Variables = HashMap<String, String>;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ name }}` placeholders in `text` with values from `vars`.
///
/// An unresolvable reference is a [ModelError::DataBinding], which aborts
/// the run rather than silently passing the placeholder through to the
/// target application.
pub fn resolve_placeholders(text: &str, vars: &Variables) -> Result<String, ModelError> {
    let re = placeholder_re();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always exists");
        let name = caps
            .get(1)
            .expect("placeholder pattern has one group")
            .as_str();
        let value = vars.get(name).ok_or_else(|| ModelError::DataBinding {
            name: name.to_string(),
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_variables() {
        let resolved =
            resolve_placeholders("Hello {{ user }}, id={{id}}", &vars(&[("user", "Ada"), ("id", "7")]))
                .unwrap();
        assert_eq!(resolved, "Hello Ada, id=7");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let resolved = resolve_placeholders("plain text", &Variables::new()).unwrap();
        assert_eq!(resolved, "plain text");
    }

    #[test]
    fn unknown_variable_is_a_binding_error() {
        let err = resolve_placeholders("{{ missing }}", &Variables::new()).unwrap_err();
        assert!(matches!(err, ModelError::DataBinding { name } if name == "missing"));
    }
}
