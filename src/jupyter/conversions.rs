use crate::core::types::{CompletionItem, FormattedValue, LinePosition, LinePositionSpan};
use serde_json::{Map, Value};

/// Completion metadata key carrying per-match type information
pub const COMPLETION_METADATA_KEY: &str = "_jupyter_types_experimental";

/// Convert a line/character position to a code-point offset into `code`
///
/// Characters past the end of a line clamp to the line end; lines past the
/// end of the code clamp to the end of the code.
pub fn offset_from_position(code: &str, position: LinePosition) -> usize {
    let mut line = 0;
    let mut character = 0;

    for (offset, ch) in code.chars().enumerate() {
        if line == position.line && (character == position.character || ch == '\n') {
            return offset;
        }
        if ch == '\n' {
            line += 1;
            character = 0;
        } else {
            character += 1;
        }
    }

    code.chars().count()
}

/// Convert a code-point offset into `code` to a line/character position
pub fn position_from_offset(code: &str, offset: usize) -> LinePosition {
    let mut position = LinePosition::new(0, 0);

    for ch in code.chars().take(offset) {
        if ch == '\n' {
            position.line += 1;
            position.character = 0;
        } else {
            position.character += 1;
        }
    }

    position
}

/// Span between two code-point offsets reported by the kernel
pub fn span_from_offsets(code: &str, start: usize, end: usize) -> LinePositionSpan {
    LinePositionSpan::new(
        position_from_offset(code, start),
        position_from_offset(code, end),
    )
}

fn mime_value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// One formatted value per MIME type in a bundle
pub fn formatted_values(bundle: &Map<String, Value>) -> Vec<FormattedValue> {
    bundle
        .iter()
        .map(|(mime_type, value)| FormattedValue::new(mime_type, mime_value_text(value)))
        .collect()
}

/// Like `formatted_values`, with terminal escape sequences removed
pub fn plain_formatted_values(bundle: &Map<String, Value>) -> Vec<FormattedValue> {
    bundle
        .iter()
        .map(|(mime_type, value)| {
            FormattedValue::new(mime_type, strip_ansi_escapes(&mime_value_text(value)))
        })
        .collect()
}

/// Remove ANSI CSI and OSC escape sequences from kernel-rendered text
pub fn strip_ansi_escapes(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            output.push(ch);
            continue;
        }

        match chars.peek() {
            // CSI: parameters and intermediates, then one final byte in @..~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: terminated by BEL or ESC \
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }

    output
}

/// Join completion matches with the kernel's experimental type metadata
pub fn completion_items(matches: &[String], metadata: &Map<String, Value>) -> Vec<CompletionItem> {
    let entries = metadata
        .get(COMPLETION_METADATA_KEY)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    matches
        .iter()
        .map(|candidate| {
            let entry = entries
                .iter()
                .find(|entry| entry.get("text").and_then(Value::as_str) == Some(candidate.as_str()));

            let display_text = entry
                .and_then(|e| e.get("displayText").and_then(Value::as_str))
                .unwrap_or(candidate.as_str())
                .to_string();
            let kind = entry
                .and_then(|e| e.get("type").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();

            CompletionItem {
                display_text,
                kind,
                insert_text: candidate.clone(),
                filter_text: candidate.clone(),
                sort_text: candidate.clone(),
            }
        })
        .collect()
}
