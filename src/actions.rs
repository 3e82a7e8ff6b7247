/// Actions raised by the rendered UI (a button press, a form submit).
///
/// An A2UI button carries `{"name": "submit_form", "context": [{"key": ..,
/// "value": ..}]}`. The session never interprets the action; it turns it into
/// a plain-language refinement prompt and submits that.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserAction {
    pub name: String,
    #[serde(default, deserialize_with = "context_entries")]
    pub context: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct ContextEntry {
    key: String,
    value: Value,
}

fn context_entries<'de, D>(de: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Vec::<ContextEntry>::deserialize(de)?;
    Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
}

impl UserAction {
    /// Parse the command-line form `name key=value key2="two words"`.
    /// Values are kept as strings. Returns None when there is no name.
    pub fn parse(input: &str) -> Option<Self> {
        let mut words = split_words(input).into_iter();
        let name = words.next()?;
        if name.contains('=') {
            return None;
        }
        let context = words
            .filter_map(|w| {
                let (k, v) = w.split_once('=')?;
                Some((k.to_string(), Value::String(v.to_string())))
            })
            .collect();
        Some(Self { name, context })
    }

    /// Prompt sent to the generator on the user's behalf.
    pub fn to_prompt(&self) -> String {
        if self.context.is_empty() {
            return format!(
                "The user triggered the `{}` action. Update the UI to reflect it.",
                self.name
            );
        }
        let values: Vec<String> = self
            .context
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k} = {s:?}"),
                other => format!("{k} = {other}"),
            })
            .collect();
        format!(
            "The user triggered the `{}` action with: {}. Update the UI to reflect it.",
            self.name,
            values.join(", ")
        )
    }
}

/// Whitespace split that keeps double-quoted runs together.
fn split_words(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_command_form() {
        let a = UserAction::parse(r#"submit_form name="Ada Lovelace" email=ada@example.com"#).unwrap();
        assert_eq!(a.name, "submit_form");
        assert_eq!(a.context.get("name"), Some(&json!("Ada Lovelace")));
        assert_eq!(a.context.get("email"), Some(&json!("ada@example.com")));
        assert!(UserAction::parse("   ").is_none());
        assert!(UserAction::parse("k=v").is_none());
    }

    #[test]
    fn test_deserialize_a2ui_action() {
        let a: UserAction = serde_json::from_value(json!({
            "name": "book",
            "context": [{"key": "guests", "value": 4}, {"key": "date", "value": "2026-10-19"}]
        }))
        .unwrap();
        assert_eq!(a.context.len(), 2);
        assert_eq!(a.context["guests"], json!(4));
    }

    #[test]
    fn test_prompt_lists_context_in_key_order() {
        let a = UserAction::parse("submit_form phone=555 name=Ada").unwrap();
        assert_eq!(
            a.to_prompt(),
            "The user triggered the `submit_form` action with: name = \"Ada\", phone = \"555\". Update the UI to reflect it."
        );
        let bare = UserAction::parse("refresh").unwrap();
        assert!(bare.to_prompt().starts_with("The user triggered the `refresh` action."));
    }
}
