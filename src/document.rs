/// The declarative UI produced by one generation round.
///
/// A document is an ordered list of A2UI messages (`beginRendering`,
/// `surfaceUpdate`, `dataModelUpdate`, ...). The session never looks inside
/// them; it only cares that there is at least one, and that nobody can change
/// them once they are bound to a snapshot.
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::GenerationError;

/// Separates the one-line explanation from the JSON array in a model reply.
pub const DELIMITER: &str = "---a2ui_JSON---";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fragments: Arc<[Value]>,
}

impl Document {
    /// Wrap generator output. Zero fragments is not a document.
    pub fn from_fragments(fragments: Vec<Value>) -> Result<Self, GenerationError> {
        if fragments.is_empty() {
            return Err(GenerationError::EmptyResult);
        }
        Ok(Self { fragments: fragments.into() })
    }

    pub fn fragments(&self) -> &[Value] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// True when both handles point at the same stored fragments.
    #[cfg(test)]
    pub fn same_as(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.fragments, &other.fragments)
    }

    /// Compact JSON array, as replayed to the generator.
    pub fn to_json(&self) -> String {
        Value::Array(self.fragments.to_vec()).to_string()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self.fragments()).unwrap_or_else(|_| self.to_json())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fragments().serialize(serializer)
    }
}

// ── Reply codec ───────────────────────────────────────────────────────────────

/// Render a generation result the way the model is asked to answer:
/// explanation, delimiter, compact JSON array.
pub fn encode_reply(explanation: Option<&str>, document: &Document) -> String {
    let text = explanation
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Here is the generated UI.");
    format!("{text}\n{DELIMITER}\n{}", document.to_json())
}

/// Split a raw model reply into its explanation and fragment list.
///
/// Tolerates a Markdown code fence around the JSON. An empty array is
/// `EmptyResult`; anything else that isn't a JSON array is `Malformed`.
pub fn decode_reply(text: &str) -> Result<(Option<String>, Vec<Value>), GenerationError> {
    let Some((head, json_part)) = text.split_once(DELIMITER) else {
        return Err(GenerationError::Malformed(format!(
            "reply is missing the {DELIMITER} delimiter"
        )));
    };

    let mut json_part = json_part.trim().to_string();
    if json_part.starts_with("```") {
        json_part = json_part
            .lines()
            .filter(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
    }

    let parsed: Value = serde_json::from_str(&json_part).map_err(|e| {
        let preview: String = json_part.chars().take(120).collect();
        GenerationError::Malformed(format!("invalid JSON after delimiter ({e}): {preview}"))
    })?;

    let Value::Array(fragments) = parsed else {
        return Err(GenerationError::Malformed(
            "JSON after delimiter is not an array".to_string(),
        ));
    };
    if fragments.is_empty() {
        return Err(GenerationError::EmptyResult);
    }

    let explanation = Some(head.trim().to_string()).filter(|s| !s.is_empty());
    Ok((explanation, fragments))
}
