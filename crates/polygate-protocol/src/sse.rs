use bytes::Bytes;

/// One meaningful line of an upstream SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `data: [DONE]` sentinel.
    Done,
    /// Payload after a `data:` prefix.
    Data(String),
}

/// Incremental line reader over an upstream SSE byte stream.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte UTF-8
/// sequence split across chunks is reassembled before decoding. Empty
/// lines, `:` comments, and non-`data:` fields are dropped.
#[derive(Debug, Default)]
pub struct SseFrameReader {
    buffer: Vec<u8>,
}

impl SseFrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(frame) = parse_line(line.trim()) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Drain the residual (a final line without a trailing newline).
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
        parse_line(line.trim()).into_iter().collect()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        self.push(chunk.as_ref())
    }
}

fn parse_line(line: &str) -> Option<SseFrame> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if line == "data: [DONE]" {
        return Some(SseFrame::Done);
    }
    let payload = line.strip_prefix("data:")?;
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Some(SseFrame::Done);
    }
    if payload.is_empty() {
        return None;
    }
    Some(SseFrame::Data(payload.to_string()))
}
