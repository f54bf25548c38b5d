//! Incremental server-sent events decoder.
//!
//! Network chunks do not line up with events, so bytes are buffered until a
//! full line is available. Only `data` fields are kept; an event's data lines
//! are joined with `\n` and emitted when the blank line closing it arrives.

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the payloads of every event they complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.handle_line(line.trim_end_matches(|c| c == '\n' || c == '\r'), &mut events);
        }
        events
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            self.handle_line(line.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"data: {\"a\":1}\n\n"), vec![r#"{"a":1}"#]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: hel").is_empty());
        assert!(decoder.feed(b"lo\n").is_empty());
        assert_eq!(decoder.feed(b"\ndata: next\n\n"), vec!["hello", "next"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"data: one\r\n\r\ndata: two\r\n\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn test_multiline_data_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\nevent: message\nid: 7\ndata: a\ndata:b\n\n");
        assert_eq!(events, vec!["a\nb"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: last").is_empty());
        assert_eq!(decoder.finish(), vec!["last"]);
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let text = "data: héllo\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        // Split inside the two-byte 'é'.
        assert!(decoder.feed(&text[..8]).is_empty());
        assert_eq!(decoder.feed(&text[8..]), vec!["héllo"]);
    }
}
