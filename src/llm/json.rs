use crate::error::ParseError;
use serde::de::DeserializeOwned;

/// Locate the JSON object in a model reply.
///
/// Models wrap structured output in prose or markdown fences more often than
/// not, so this tries a ```json fence, then a bare ``` fence that opens with
/// `{`, then the outermost `{ ... }` span.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            let candidate = rest[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate);
            }
        }
    }

    if let Some(start) = text.find("```\n{") {
        let rest = &text[start + "```\n".len()..];
        if let Some(end) = rest.find("```") {
            let candidate = rest[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate);
            }
        }
    }

    let open = text.find('{')?;
    let close = text.rfind('}')?;
    (close > open).then(|| &text[open..=close])
}

/// Extract and decode a typed object from a model reply.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let raw = extract_json(text).ok_or(ParseError::NoJson)?;
    Ok(serde_json::from_str(raw)?)
}
