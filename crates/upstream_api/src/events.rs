/// Normalized event decoded from a generation response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextStreamEvent {
    /// Verbatim text increment.
    Delta { text: String },
    /// Explicit end-of-stream marker.
    Done,
    /// Error reported by the service inside an otherwise successful response.
    Error {
        code: Option<String>,
        message: String,
    },
}

impl TextStreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// How a response body is framed, chosen from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    EventStream,
    PlainText,
}

impl BodyFraming {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(value) if value.to_ascii_lowercase().contains("text/event-stream") => {
                Self::EventStream
            }
            _ => Self::PlainText,
        }
    }
}
