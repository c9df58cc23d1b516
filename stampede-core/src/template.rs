use std::borrow::Cow;

use crate::error::ScriptError;

/// Renders `{{key}}` placeholders through `lookup`.
///
/// `{{key|fallback}}` renders `fallback` when `lookup` has no value for `key`. A lone `}}` is
/// literal text (JSON bodies end objects with it). Text without placeholders is returned
/// borrowed.
pub fn render<'a, 'v, F>(template: &'a str, lookup: F) -> Result<Cow<'a, str>, ScriptError>
where
    F: Fn(&str) -> Option<Cow<'v, str>>,
{
    if !template.contains("{{") {
        return Ok(Cow::Borrowed(template));
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);

        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| malformed(template, "unclosed `{{`"))?;
        let inner = &after_open[..close];
        if inner.contains("{{") {
            return Err(malformed(template, "nested `{{`"));
        }

        let (key, fallback) = match inner.split_once('|') {
            Some((k, f)) => (k.trim(), Some(f.trim())),
            None => (inner.trim(), None),
        };
        if key.is_empty() {
            return Err(malformed(template, "empty placeholder"));
        }

        match (lookup(key), fallback) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(f)) => out.push_str(f),
            (None, None) => return Err(ScriptError::MissingValue(key.to_string())),
        }

        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

fn malformed(template: &str, reason: &'static str) -> ScriptError {
    ScriptError::MalformedTemplate {
        template: template.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(key: &str) -> Option<Cow<'static, str>> {
        match key {
            "BASE_URL" => Some(Cow::Borrowed("http://localhost:4567/api")),
            "plan_id" => Some(Cow::Owned("42".to_string())),
            _ => None,
        }
    }

    fn ok(t: &str) -> String {
        render(t, lookup)
            .unwrap_or_else(|e| panic!("{e}"))
            .into_owned()
    }

    #[test]
    fn plain_text_is_borrowed() {
        let r = render("/health", lookup).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(r, Cow::Borrowed("/health")));
    }

    #[test]
    fn placeholders_are_substituted() {
        assert_eq!(
            ok("{{BASE_URL}}/travel-plans/{{ plan_id }}"),
            "http://localhost:4567/api/travel-plans/42"
        );
        assert_eq!(ok(r#"{"id":"{{plan_id}}"}"#), r#"{"id":"42"}"#);
        assert_eq!(ok(r#"{"a":{"b":1}}"#), r#"{"a":{"b":1}}"#);
    }

    #[test]
    fn fallback_applies_only_when_missing() {
        assert_eq!(ok("{{env.HOST|localhost}}:80"), "localhost:80");
        assert_eq!(ok("{{plan_id|0}}"), "42");
    }

    #[test]
    fn missing_value_is_reported_by_key() {
        assert_eq!(
            render("/plans/{{plan_id}}/{{version}}", lookup).err(),
            Some(ScriptError::MissingValue("version".to_string()))
        );
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for t in ["{{plan_id", "{{}}", "{{ | x}}", "{{a{{b}}"] {
            assert!(
                matches!(
                    render(t, lookup),
                    Err(ScriptError::MalformedTemplate { .. })
                ),
                "expected `{t}` to be malformed"
            );
        }
    }
}
