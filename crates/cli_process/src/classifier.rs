//! Line classifiers for CLI output.
//!
//! A classifier maps one raw stdout line to the text shown while a turn
//! streams. Both variants are pure: the same line always classifies the same
//! way, live or in tests.

use serde_json::Value;

pub const THINKING_PREVIEW_CHARS: usize = 120;
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputClassifier {
    /// Lines pass through minus their terminator.
    #[default]
    Raw,
    /// JSON-lines records carrying `message.content` blocks.
    StreamJson,
}

/// One semantic unit decoded from an output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDelta {
    /// Answer text. Raw lines keep their trailing newline.
    Text(String),
    /// Full reasoning text of a thinking block.
    Thinking(String),
    /// Tool activity, already rendered for display.
    Status(String),
}

impl OutputDelta {
    /// One-line rendering used for live status display.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.trim_end_matches(['\r', '\n']).to_string(),
            Self::Thinking(text) => {
                format!("[Thinking] {}", preview(text, THINKING_PREVIEW_CHARS))
            }
            Self::Status(status) => status.clone(),
        }
    }
}

impl OutputClassifier {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "raw" => Some(Self::Raw),
            "stream_json" | "stream-json" | "json" => Some(Self::StreamJson),
            _ => None,
        }
    }

    /// Status text for one raw line, or `None` when the line carries nothing.
    pub fn classify(self, raw_line: &str) -> Option<String> {
        match self {
            Self::Raw => Some(strip_terminator(raw_line).to_string()),
            Self::StreamJson => {
                let deltas = self.deltas(raw_line);
                if deltas.is_empty() {
                    return None;
                }

                let rendered: Vec<String> = deltas.iter().map(OutputDelta::render).collect();
                Some(rendered.join("\n"))
            }
        }
    }

    /// Typed deltas for one raw line, in block order.
    pub fn deltas(self, raw_line: &str) -> Vec<OutputDelta> {
        match self {
            Self::Raw => {
                let mut text = strip_terminator(raw_line).to_string();
                text.push('\n');
                vec![OutputDelta::Text(text)]
            }
            Self::StreamJson => decode_stream_json(raw_line),
        }
    }
}

fn decode_stream_json(raw_line: &str) -> Vec<OutputDelta> {
    let line = raw_line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let record: Value = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(_) => return vec![OutputDelta::Text(line.to_string())],
    };

    let Some(blocks) = record
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    blocks.iter().filter_map(decode_block).collect()
}

fn decode_block(block: &Value) -> Option<OutputDelta> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?.trim();
            (!text.is_empty()).then(|| OutputDelta::Text(text.to_string()))
        }
        "thinking" => {
            let thinking = block.get("thinking").and_then(Value::as_str)?.trim();
            (!thinking.is_empty()).then(|| OutputDelta::Thinking(thinking.to_string()))
        }
        "tool_use" => {
            let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let input = block.get("input").unwrap_or(&Value::Null);
            Some(OutputDelta::Status(tool_use_summary(name, input)))
        }
        "tool_result" => {
            // Only plain-string results are previewed, empty ones included.
            let content = block.get("content")?.as_str()?;
            Some(OutputDelta::Status(format!(
                "  result: {}",
                preview(content, TOOL_RESULT_PREVIEW_CHARS)
            )))
        }
        _ => None,
    }
}

/// Tool names match exactly; anything unrecognized gets the generic label.
fn tool_use_summary(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);

    match name {
        "read" => format!("[Reading] {}", field("file_path").unwrap_or_default()),
        "write" => format!("[Writing] {}", field("file_path").unwrap_or_default()),
        "bash" | "shell" => {
            let command = field("command")
                .or_else(|| field("description"))
                .unwrap_or_default();
            format!("[Running] {command}")
        }
        "skill" => format!("[Skill] {}", field("command").unwrap_or_default()),
        _ => format!("[Tool: {name}]"),
    }
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// First `max_chars` characters, with `...` appended when truncated.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_counts_characters_not_bytes() {
        assert_eq!(preview("héllo", 3), "hél...");
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("exact", 5), "exact");
    }

    #[test]
    fn raw_strips_only_the_line_terminator() {
        assert_eq!(
            OutputClassifier::Raw.classify("  padded  \r\n"),
            Some("  padded  ".to_string())
        );
        assert_eq!(OutputClassifier::Raw.classify("\n"), Some(String::new()));
    }

    #[test]
    fn from_name_accepts_known_variants() {
        assert_eq!(OutputClassifier::from_name("raw"), Some(OutputClassifier::Raw));
        assert_eq!(
            OutputClassifier::from_name("stream-json"),
            Some(OutputClassifier::StreamJson)
        );
        assert_eq!(OutputClassifier::from_name("xml"), None);
    }
}
