use serde_json::Value;

use crate::document::DELIMITER;
use crate::turns::TurnLog;

const SYSTEM_PROMPT_BASE: &str = r#"You are a UI generation assistant. You answer every request with an A2UI declarative UI.

Reply format (no exceptions):
One short sentence describing the UI.
---a2ui_JSON---
[ ...A2UI JSON array... ]

Rules:
- The delimiter line appears exactly once.
- After the delimiter output only the raw JSON array: no Markdown, no code fences.
- The array contains, in order: beginRendering, surfaceUpdate, dataModelUpdate.
- When refining an existing UI keep the same surfaceId and re-output the complete updated UI, unchanged components included.
- Give the UI a specific, invented product or company name as its h1 title rather than a generic heading.
- Never use a generic h1 such as "Our Company", "Contact Us", "Application Form" or "Dashboard".

Example reply:
Here is the Tidewater Labs contact form.
---a2ui_JSON---
[
  {"beginRendering": {"surfaceId": "contact", "root": "main"}},
  {"surfaceUpdate": {"surfaceId": "contact", "components": [
    {"id": "main", "component": {"Column": {"children": {"explicitList": ["title", "email", "send"]}}}},
    {"id": "title", "component": {"Text": {"usageHint": "h1", "text": {"literalString": "Tidewater Labs"}}}},
    {"id": "email", "component": {"TextField": {"label": {"literalString": "Email"}, "text": {"path": "email"}, "textFieldType": "shortText"}}},
    {"id": "send", "component": {"Button": {"child": "send-label", "primary": true, "action": {"name": "send_message", "context": [{"key": "email", "value": {"path": "email"}}]}}}},
    {"id": "send-label", "component": {"Text": {"text": {"literalString": "Send"}}}}
  ]}},
  {"dataModelUpdate": {"surfaceId": "contact", "path": "/", "contents": [{"key": "email", "valueString": ""}]}}
]

Components you may use:
- Text: {"Text": {"text": {"literalString": "..."}, "usageHint": "h1|h2|h3|h4|h5|caption|body"}}
- TextField: {"TextField": {"label": {"literalString": "..."}, "text": {"path": "..."}, "textFieldType": "shortText|longText|number|date|obscured"}}
- MultipleChoice: {"MultipleChoice": {"description": {"literalString": "..."}, "selections": {"path": "..."}, "options": [{"label": {"literalString": "..."}}]}}
- Button: {"Button": {"child": "text-id", "primary": true, "action": {"name": "action_name", "context": [{"key": "k", "value": {"path": "k"}}]}}}
- Column / Row: {"Column": {"children": {"explicitList": ["id1", "id2"]}}}
- Card: {"Card": {"child": "content-id"}}
- Icon: {"Icon": {"name": {"literalString": "mail|person|phone|search|settings|star|home|info|warning|send"}}}
- Divider: {"Divider": {}}
- List: {"List": {"direction": "vertical", "children": {"template": {"componentId": "...", "dataBinding": "/items"}}}}"#;

/// Appended to every request; models drift back to generic titles otherwise.
const TITLE_REMINDER: &str = "Use an invented, specific company or product name as the h1 title, not a generic heading.";

const REFINE_SUFFIX: &str =
    "Refine the UI from your previous reply. Keep the same surfaceId and re-output the complete updated UI.";

pub fn system_prompt() -> String {
    debug_assert!(SYSTEM_PROMPT_BASE.contains(DELIMITER));
    SYSTEM_PROMPT_BASE.to_string()
}

/// Chat messages for one request: system prompt, prior turns, then the new
/// prompt. The prompt carries the title reminder, and refinements also get a
/// note to re-output the whole UI.
pub fn build_messages(system: &str, history: &TurnLog, prompt: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len() + 2);

    if !system.is_empty() {
        out.push(serde_json::json!({
            "role": "system",
            "content": system
        }));
    }

    for turn in history {
        if turn.content().is_empty() {
            continue;
        }
        out.push(serde_json::json!({
            "role": turn.role().as_str(),
            "content": turn.content()
        }));
    }

    let content = if history.is_empty() {
        format!("{prompt}\n\n{TITLE_REMINDER}")
    } else {
        format!("{prompt}\n\n{REFINE_SUFFIX} {TITLE_REMINDER}")
    };
    out.push(serde_json::json!({
        "role": "user",
        "content": content
    }));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::turns::Turn;
    use serde_json::json;

    #[test]
    fn test_fresh_request_has_no_history() {
        let msgs = build_messages("sys", &TurnLog::new(), "Build a contact form");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        let content = msgs[1]["content"].as_str().unwrap();
        assert!(content.starts_with("Build a contact form\n\n"));
        assert!(content.ends_with(TITLE_REMINDER));
        assert!(!content.contains("same surfaceId"));
    }

    #[test]
    fn test_refinement_replays_turns_in_order() {
        let doc = Document::from_fragments(vec![json!({"beginRendering": {}})]).unwrap();
        let mut log = TurnLog::new();
        log.push_round(Turn::user("Build a contact form"), Turn::assistant(Some("A form."), &doc));

        let msgs = build_messages("", &log, "Add a phone field");
        let roles: Vec<&str> = msgs.iter().filter_map(|m| m["role"].as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        let last = msgs[2]["content"].as_str().unwrap();
        assert!(last.starts_with("Add a phone field\n\n"));
        assert!(last.contains("same surfaceId"));
        assert!(last.ends_with(TITLE_REMINDER));
        assert!(msgs[1]["content"].as_str().unwrap().contains(DELIMITER));
    }

    #[test]
    fn test_system_prompt_names_delimiter() {
        assert!(system_prompt().contains(DELIMITER));
    }

    #[test]
    fn test_example_reply_decodes() {
        let prompt = system_prompt();
        let example = prompt
            .split_once("Example reply:\n")
            .and_then(|(_, rest)| rest.split_once("\n\nComponents you may use:"))
            .map(|(example, _)| example)
            .unwrap();
        let (explanation, fragments) = crate::document::decode_reply(example).unwrap();
        assert_eq!(explanation.as_deref(), Some("Here is the Tidewater Labs contact form."));
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].get("beginRendering").is_some());
    }
}
