//! `{{{name}}}` placeholder substitution used by the Flow Expander.
//!
//! Mirrors the regex-driven substitution in the teacher's
//! `ferri-automation::expressions::evaluate_expressions`, adapted from the
//! `${{ ctx.* }}` expression syntax to the flat `{{{name}}}` literal syntax
//! this system's config format uses (`spec.md` §6).

use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\{\s*([A-Za-z0-9_]+)\s*\}\}\}").unwrap())
}

/// Replaces every `{{{name}}}` occurrence with its bound text from
/// `bindings`. Names with no binding are left untouched. Idempotent on
/// strings containing no placeholder tokens.
pub fn substitute(text: &str, bindings: &[(String, String)]) -> String {
    pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            bindings
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_single_placeholder() {
        let bindings = vec![("name".to_string(), "World".to_string())];
        assert_eq!(substitute("Hello {{{name}}}!", &bindings), "Hello World!");
    }

    #[test]
    fn substitutes_multiple_placeholders() {
        let bindings = vec![
            ("first".to_string(), "John".to_string()),
            ("last".to_string(), "Doe".to_string()),
        ];
        assert_eq!(
            substitute("Name: {{{first}}} {{{last}}}", &bindings),
            "Name: John Doe"
        );
    }

    #[test]
    fn leaves_unbound_placeholders_untouched() {
        let bindings: Vec<(String, String)> = vec![];
        assert_eq!(substitute("Hi {{{name}}}", &bindings), "Hi {{{name}}}");
    }

    #[test]
    fn is_idempotent_on_plain_text() {
        let bindings = vec![("name".to_string(), "World".to_string())];
        let text = "No placeholders here";
        assert_eq!(substitute(text, &bindings), text);
    }
}
