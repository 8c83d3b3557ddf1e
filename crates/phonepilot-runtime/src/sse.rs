//! Incremental Server-Sent Events parser.
//!
//! Network chunks can split a frame (or a UTF-8 sequence) anywhere, so
//! bytes are buffered until a blank line closes the frame and only whole
//! frames are decoded.

use phonepilot_types::event::{AgentEvent, DoneEvent, ErrorEvent, StepEvent};

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `"message"` when absent.
    pub event: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Buffers raw bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a network chunk. Carriage returns are dropped so CRLF and LF
    /// framing parse the same way.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Frames with no `data:` lines (keep-alive comments) are skipped.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let pos = find_blank_line(&self.buffer)?;
            let raw: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&raw[..pos]);
            if let Some(frame) = decode_frame(&text) {
                return Some(frame);
            }
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn decode_frame(text: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

/// Map a frame of the agent server's task stream onto an [`AgentEvent`].
///
/// Returns `None` for event names the console does not handle.
pub fn decode_agent_event(frame: &SseFrame) -> Option<Result<AgentEvent, serde_json::Error>> {
    let event = match frame.event.as_str() {
        "step" => serde_json::from_str::<StepEvent>(&frame.data).map(AgentEvent::Step),
        "done" => serde_json::from_str::<DoneEvent>(&frame.data).map(AgentEvent::Done),
        "error" => serde_json::from_str::<ErrorEvent>(&frame.data).map(AgentEvent::Error),
        // Unnamed frames still carry a `type` discriminator in the payload.
        "message" => serde_json::from_str::<AgentEvent>(&frame.data),
        _ => return None,
    };
    Some(event)
}
