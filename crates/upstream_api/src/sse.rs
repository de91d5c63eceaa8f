use serde_json::Value;

use crate::events::TextStreamEvent;

/// Incremental parser for SSE text streams.
///
/// Input must already be valid UTF-8 text; see [`crate::utf8::Utf8ChunkDecoder`].
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed a text chunk into the parser and drain complete events.
    pub fn feed(&mut self, text: &str) -> Vec<TextStreamEvent> {
        self.buffer.push_str(text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(event) = extract_data_payload(&frame).and_then(|data| map_payload(&data)) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<TextStreamEvent> {
        let frame = std::mem::take(&mut self.buffer);
        extract_data_payload(frame.trim_end_matches('\n'))
            .and_then(|data| map_payload(&data))
            .into_iter()
            .collect()
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<TextStreamEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input);
        events.extend(parser.finish());
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    // One optional space after the colon belongs to the framing; the rest is payload.
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_payload(payload: &str) -> Option<TextStreamEvent> {
    if payload.is_empty() {
        return None;
    }
    if payload.trim() == "[DONE]" {
        return Some(TextStreamEvent::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(object)) => map_event(&Value::Object(object)),
        Ok(Value::String(text)) => non_empty_delta(text),
        // Bare non-JSON data lines are text increments.
        _ => non_empty_delta(payload.to_owned()),
    }
}

fn map_event(value: &Value) -> Option<TextStreamEvent> {
    let event_type = value.get("type").and_then(Value::as_str)?;

    match event_type {
        "text.delta" | "text-delta" | "delta" => {
            let text = value
                .get("delta")
                .or_else(|| value.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("");
            non_empty_delta(text.to_owned())
        }
        "done" | "finish" => Some(TextStreamEvent::Done),
        "error" => {
            let code = value
                .get("code")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .or_else(|| code.clone())
                .unwrap_or_else(|| "generation service reported an error".to_owned());
            Some(TextStreamEvent::Error { code, message })
        }
        _ => None,
    }
}

fn non_empty_delta(text: String) -> Option<TextStreamEvent> {
    if text.is_empty() {
        None
    } else {
        Some(TextStreamEvent::Delta { text })
    }
}
