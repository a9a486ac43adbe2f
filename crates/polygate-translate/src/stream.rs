use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::RngCore;
use serde_json::Value;

use polygate_common::ApiFamily;
use polygate_protocol::anthropic;
use polygate_protocol::gemini;
use polygate_protocol::openai::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
use polygate_protocol::sse::{SseFrame, SseFrameReader};

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

pub fn generate_chat_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("chatcmpl-{hex}")
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}

/// Re-emits an upstream SSE body as OpenAI `chat.completion.chunk` SSE.
///
/// Pull-based byte transducer: feed raw chunks with `push`, flush with
/// `finish`. Splitting the input at any byte boundary does not change the
/// concatenated output.
#[derive(Debug)]
pub struct StreamTransformer {
    family: ApiFamily,
    model: String,
    chat_id: String,
    created: i64,
    reader: SseFrameReader,
}

impl StreamTransformer {
    pub fn new(family: ApiFamily, model: impl Into<String>, chat_id: String) -> Self {
        Self {
            family,
            model: model.into(),
            chat_id,
            created: now_epoch_seconds(),
            reader: SseFrameReader::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = Vec::new();
        for frame in self.reader.push(chunk) {
            self.emit_frame(frame, &mut out);
        }
        Bytes::from(out)
    }

    /// Flush the residual line and terminate the stream.
    pub fn finish(&mut self) -> Bytes {
        let mut out = Vec::new();
        for frame in self.reader.finish() {
            self.emit_frame(frame, &mut out);
        }
        out.extend_from_slice(DONE_FRAME);
        Bytes::from(out)
    }

    fn emit_frame(&mut self, frame: SseFrame, out: &mut Vec<u8>) {
        match frame {
            SseFrame::Done => out.extend_from_slice(DONE_FRAME),
            SseFrame::Data(payload) => {
                let parsed: Value = match serde_json::from_str(&payload) {
                    Ok(value) => value,
                    Err(_) => return,
                };
                match self.family {
                    ApiFamily::OpenAiLike => {
                        out.extend_from_slice(b"data: ");
                        out.extend_from_slice(payload.as_bytes());
                        out.extend_from_slice(b"\n\n");
                    }
                    ApiFamily::Google => {
                        if let Some(chunk) = self.google_chunk(parsed) {
                            write_chunk(&chunk, out);
                        }
                    }
                    ApiFamily::Anthropic => {
                        if let Some(chunk) = self.anthropic_chunk(parsed) {
                            write_chunk(&chunk, out);
                        }
                    }
                }
            }
        }
    }

    fn google_chunk(&self, parsed: Value) -> Option<ChatCompletionChunk> {
        let response: gemini::GenerateContentResponse = serde_json::from_value(parsed).ok()?;
        let candidate = response.candidates.into_iter().next()?;
        let content = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.first())
            .and_then(|part| part.text.clone());
        let finish_reason = candidate
            .finish_reason
            .as_deref()
            .map(map_gemini_finish);
        Some(self.chunk(ChunkDelta { role: None, content }, finish_reason))
    }

    fn anthropic_chunk(&self, parsed: Value) -> Option<ChatCompletionChunk> {
        let event: anthropic::StreamEvent = serde_json::from_value(parsed).ok()?;
        match event {
            anthropic::StreamEvent::ContentBlockDelta { delta } => {
                let text = delta.text?;
                Some(self.chunk(
                    ChunkDelta {
                        role: None,
                        content: Some(text),
                    },
                    None,
                ))
            }
            anthropic::StreamEvent::MessageDelta { delta } => {
                let stop_reason = delta.stop_reason?;
                Some(self.chunk(
                    ChunkDelta::default(),
                    Some(map_anthropic_stop(&stop_reason)),
                ))
            }
            anthropic::StreamEvent::Other => None,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.chat_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

fn write_chunk(chunk: &ChatCompletionChunk, out: &mut Vec<u8>) {
    if let Ok(payload) = serde_json::to_vec(chunk) {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(&payload);
        out.extend_from_slice(b"\n\n");
    }
}

pub(crate) fn map_gemini_finish(reason: &str) -> String {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        // STOP, OTHER, and anything newer all terminate normally.
        _ => "stop",
    }
    .to_string()
}

pub(crate) fn map_anthropic_stop(reason: &str) -> String {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        // end_turn, stop_sequence, and unknown reasons.
        _ => "stop",
    }
    .to_string()
}
