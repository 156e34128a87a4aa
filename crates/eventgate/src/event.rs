//! SSE Event types and the framer that turns raw message bodies into them

/// SSE comment sent once, before any data, when a stream opens
pub const BANNER: &str = ": SSE stream\n\n";

/// SSE Event to be sent to clients
///
/// Only `data` is populated by the gateway; `id`, `event` and `retry` are
/// reserved and stay empty/zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    id: String,
    event_type: String,
    data: String,
    retry: u32,
}

impl SseEvent {
    /// Event id (always empty)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event type (always empty)
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Normalized payload, always terminated by `\n`
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Retry hint in milliseconds (always 0)
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Wire text of the event's data field(s)
    ///
    /// Every payload line is prefixed with `data: `. The result ends with a
    /// single `\n`; the writer appends the blank line that delimits the event.
    pub fn to_wire(&self) -> String {
        let data = self.data.trim_matches('\n');
        format!("data: {}\n", data.replace('\n', "\ndata: "))
    }

    /// Wire text including the event delimiter
    pub fn to_frame(&self) -> String {
        let mut frame = self.to_wire();
        frame.push('\n');
        frame
    }
}

/// Turns raw message bodies into SSE events
pub trait Producer: Send + Sync + 'static {
    /// Frame one message body
    fn server_sent_event(&self, body: &[u8]) -> SseEvent;
}

/// Default framer: normalizes line endings and trims surrounding blanks
#[derive(Debug, Clone, Copy, Default)]
pub struct EventProducer;

impl Producer for EventProducer {
    fn server_sent_event(&self, body: &[u8]) -> SseEvent {
        let text = String::from_utf8_lossy(body);
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut data = unified.trim_matches(|c| c == ' ' || c == '\n').to_string();
        data.push('\n');

        SseEvent {
            data,
            ..SseEvent::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> SseEvent {
        EventProducer.server_sent_event(body.as_bytes())
    }

    #[test]
    fn test_normalizes_data() {
        let samples = [
            ("", "\n"),
            ("           ", "\n"),
            (" f\noo \n\n", "f\noo\n"),
            (" :data     ", ":data\n"),
            ("X\r\nX\n\r ", "X\nX\n"),
        ];

        for (given, expect) in samples {
            assert_eq!(frame(given).data(), expect, "given {given:?}");
        }
    }

    #[test]
    fn test_wire_text() {
        let samples = [
            ("", "data: \n"),
            ("x", "data: x\n"),
            ("event: y\ndata: x", "data: event: y\ndata: data: x\n"),
        ];

        for (given, expect) in samples {
            assert_eq!(frame(given).to_wire(), expect, "given {given:?}");
        }
    }

    #[test]
    fn test_frame_ends_with_blank_line() {
        assert_eq!(frame("foo").to_frame(), "data: foo\n\n");
        assert_eq!(frame("").to_frame(), "data: \n\n");
    }

    #[test]
    fn test_reserved_fields_are_empty() {
        let event = frame("payload");
        assert_eq!(event.id(), "");
        assert_eq!(event.event_type(), "");
        assert_eq!(event.retry(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let event = EventProducer.server_sent_event(&[b'a', 0xff, b'b']);
        assert_eq!(event.data(), "a\u{fffd}b\n");
    }
}
