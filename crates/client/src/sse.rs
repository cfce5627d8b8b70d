//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; complete lines are folded into
//! [`SseFrame`]s, one per blank-line-terminated event block. `id` and
//! `retry` fields and `:` comment lines are ignored.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `"message"` when the block had no `event:` field.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// True when a partially received event is pending. An event cut off
    /// by end-of-stream is never dispatched.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty() || self.event.is_some()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let event = event
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        Some(SseFrame { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: progress\ndata: {\"a\":1}\n\n");
        assert_eq!(frames, vec![SseFrame::new("progress", r#"{"a":1}"#)]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: compl").is_empty());
        assert!(decoder.push(b"ete\r\ndata: {\"result\"").is_empty());
        let frames = decoder.push(b":{}}\r\n\r\n");
        assert_eq!(frames, vec![SseFrame::new("complete", r#"{"result":{}}"#)]);
    }

    #[test]
    fn multiple_data_lines_are_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: one\ndata: two\n\n");
        assert_eq!(frames, vec![SseFrame::new("message", "one\ntwo")]);
    }

    #[test]
    fn comments_and_empty_blocks_are_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\nevent: ping\n\nid: 7\ndata: x\n\n");
        assert_eq!(frames, vec![SseFrame::new("message", "x")]);
    }

    #[test]
    fn several_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\nevent: c\n");
        assert_eq!(
            frames,
            vec![SseFrame::new("a", "1"), SseFrame::new("b", "2")]
        );
        assert!(decoder.has_pending());
    }

    #[test]
    fn utf8_split_inside_a_line() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: héllo\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![SseFrame::new("message", "héllo")]);
    }
}
