//! Push-channel frame types and the server-sent-events decoder.
//!
//! The Analysis Service streams `text/event-stream` with two named
//! events: `status_update` (body is a raw status token) and
//! `analysis_result` (body is the JSON analysis document). Comment lines
//! are used as keep-alives.

/// Event name carrying a bare lifecycle status token.
pub const EVENT_STATUS_UPDATE: &str = "status_update";

/// Event name carrying the full analysis document.
pub const EVENT_ANALYSIS_RESULT: &str = "analysis_result";

/// Event name assumed when a frame has no `event:` field.
const DEFAULT_EVENT_NAME: &str = "message";

/// One dispatched unit from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A named event with its (possibly multi-line) data.
    Event { name: String, data: String },
    /// A comment line. Carries no data but proves the stream is alive.
    Heartbeat,
}

impl Frame {
    pub fn event(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Event {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// A frame classified by the events this client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    StatusUpdate(String),
    AnalysisResult(String),
    Heartbeat,
    /// Any other event name. Logged and ignored.
    Other { name: String },
}

/// Classify a decoded frame.
pub fn parse_frame(frame: Frame) -> StreamMessage {
    match frame {
        Frame::Heartbeat => StreamMessage::Heartbeat,
        Frame::Event { name, data } => match name.as_str() {
            EVENT_STATUS_UPDATE => StreamMessage::StatusUpdate(data.trim().to_string()),
            EVENT_ANALYSIS_RESULT => StreamMessage::AnalysisResult(data),
            _ => StreamMessage::Other { name },
        },
    }
}

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

/// Incremental `text/event-stream` decoder.
///
/// Feed raw body chunks in arrival order; complete frames are returned as
/// soon as their terminating blank line has been seen. Chunk boundaries
/// may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(frame) = self.process_line(&line) {
                    frames.push(frame);
                }
            } else {
                self.line.push(byte);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Some(Frame::Heartbeat);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            // `id` and `retry` are not used: reconnection is driven by the
            // subscription manager, not by the server.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(Frame::Event {
            name: event.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data: std::mem::take(&mut self.data),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_status_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: status_update\ndata: TRANSCRIBING\n\n");
        assert_eq!(frames, vec![Frame::event("status_update", "TRANSCRIBING")]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: analysis_res").is_empty());
        assert!(decoder.feed(b"ult\ndata: {\"score\":").is_empty());
        let frames = decoder.feed(b"82}\n\n");
        assert_eq!(frames, vec![Frame::event("analysis_result", "{\"score\":82}")]);
    }

    #[test]
    fn multi_line_data_is_joined_with_newlines() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: analysis_result\ndata: {\ndata: \"score\": 1\ndata: }\n\n");
        assert_eq!(
            frames,
            vec![Frame::event("analysis_result", "{\n\"score\": 1\n}")]
        );
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: status_update\r\ndata: failed\r\n\r\n");
        assert_eq!(frames, vec![Frame::event("status_update", "failed")]);
    }

    #[test]
    fn comment_line_is_heartbeat() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keep-alive\n");
        assert_eq!(frames, vec![Frame::Heartbeat]);
    }

    #[test]
    fn unnamed_event_defaults_to_message() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: hi\n\n");
        assert_eq!(frames, vec![Frame::event("message", "hi")]);
    }

    #[test]
    fn event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: status_update\n\n").is_empty());
        // The dangling event name must not leak into the next frame.
        let frames = decoder.feed(b"data: x\n\n");
        assert_eq!(frames, vec![Frame::event("message", "x")]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: análise\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let frames = decoder.feed(&bytes[split..]);
        assert_eq!(frames, vec![Frame::event("message", "análise")]);
    }

    #[test]
    fn parse_frame_classifies_known_events() {
        assert_eq!(
            parse_frame(Frame::event(EVENT_STATUS_UPDATE, " analyzing_speech ")),
            StreamMessage::StatusUpdate("analyzing_speech".into())
        );
        assert_eq!(
            parse_frame(Frame::event(EVENT_ANALYSIS_RESULT, "{}")),
            StreamMessage::AnalysisResult("{}".into())
        );
        assert_eq!(
            parse_frame(Frame::event("ping", "")),
            StreamMessage::Other { name: "ping".into() }
        );
        assert_eq!(parse_frame(Frame::Heartbeat), StreamMessage::Heartbeat);
    }
}
