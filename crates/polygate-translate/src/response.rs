use serde_json::{Value, json};

use polygate_common::ApiFamily;
use polygate_protocol::anthropic;
use polygate_protocol::gemini;
use polygate_protocol::openai::{AssistantMessage, ChatChoice, ChatCompletion, Usage};

use crate::stream::{generate_chat_id, map_anthropic_stop, map_gemini_finish, now_epoch_seconds};

#[derive(Debug, thiserror::Error)]
#[error("upstream response is not valid JSON: {0}")]
pub struct NormalizeError(#[from] serde_json::Error);

/// Map a buffered upstream response body into the OpenAI
/// `chat.completion` shape. Already-OpenAI payloads only get missing
/// `id`/`created`/`model`/usage fields filled in, so normalizing twice
/// is a no-op.
pub fn normalize_response(
    family: ApiFamily,
    model: &str,
    raw: &[u8],
) -> Result<Value, NormalizeError> {
    let parsed: Value = serde_json::from_slice(raw)?;
    Ok(match family {
        ApiFamily::OpenAiLike => normalize_openai(model, parsed),
        ApiFamily::Google => serde_json::to_value(normalize_google(model, parsed)?)?,
        ApiFamily::Anthropic => serde_json::to_value(normalize_anthropic(model, parsed)?)?,
    })
}

fn normalize_openai(model: &str, mut parsed: Value) -> Value {
    let Some(map) = parsed.as_object_mut() else {
        return parsed;
    };
    if !map.get("id").is_some_and(Value::is_string) {
        map.insert("id".to_string(), Value::String(generate_chat_id()));
    }
    if !map.get("model").is_some_and(Value::is_string) {
        map.insert("model".to_string(), Value::String(model.to_string()));
    }
    if !map.get("created").is_some_and(Value::is_number) {
        map.insert("created".to_string(), json!(now_epoch_seconds()));
    }
    map.insert(
        "object".to_string(),
        Value::String("chat.completion".to_string()),
    );
    map.entry("choices").or_insert_with(|| json!([]));

    let usage = map.entry("usage").or_insert_with(|| json!({}));
    if let Some(usage) = usage.as_object_mut() {
        for field in ["prompt_tokens", "completion_tokens", "total_tokens"] {
            usage.entry(field).or_insert(json!(0));
        }
    }
    parsed
}

fn normalize_google(model: &str, parsed: Value) -> Result<ChatCompletion, NormalizeError> {
    let response: gemini::GenerateContentResponse = serde_json::from_value(parsed)?;
    let candidate = response.candidates.into_iter().next();

    let text = candidate
        .as_ref()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .concat()
        })
        .unwrap_or_default();
    let finish_reason = candidate
        .and_then(|candidate| candidate.finish_reason)
        .map(|reason| map_gemini_finish(&reason))
        .unwrap_or_else(|| "stop".to_string());

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(completion(
        model,
        text,
        finish_reason,
        Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        },
    ))
}

fn normalize_anthropic(model: &str, parsed: Value) -> Result<ChatCompletion, NormalizeError> {
    let response: anthropic::MessagesResponse = serde_json::from_value(parsed)?;

    let text = response
        .content
        .iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .concat();
    let finish_reason = response
        .stop_reason
        .map(|reason| map_anthropic_stop(&reason))
        .unwrap_or_else(|| "stop".to_string());

    let input = response.usage.input_tokens;
    let output = response.usage.output_tokens;
    Ok(completion(
        model,
        text,
        finish_reason,
        Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        },
    ))
}

fn completion(model: &str, text: String, finish_reason: String, usage: Usage) -> ChatCompletion {
    ChatCompletion {
        id: generate_chat_id(),
        object: "chat.completion".to_string(),
        created: now_epoch_seconds(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: text,
            },
            finish_reason: Some(finish_reason),
        }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_fills_missing_fields_and_is_idempotent() {
        let raw = br#"{"choices":[{"index":0,"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3}}"#;
        let first = normalize_response(ApiFamily::OpenAiLike, "gpt-4o", raw).unwrap();

        assert_eq!(first["object"], "chat.completion");
        assert_eq!(first["model"], "gpt-4o");
        assert!(first["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(first["usage"]["prompt_tokens"], 3);
        assert_eq!(first["usage"]["completion_tokens"], 0);
        assert_eq!(first["usage"]["total_tokens"], 0);
        assert_eq!(first["choices"][0]["message"]["content"], "ok");

        let again = normalize_response(
            ApiFamily::OpenAiLike,
            "gpt-4o",
            &serde_json::to_vec(&first).unwrap(),
        )
        .unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn google_concatenates_parts_and_maps_usage() {
        let raw = br#"{
            "candidates": [{
                "content": {"parts": [{"text": "Hel"}, {"text": "lo"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "totalTokenCount": 9}
        }"#;
        let out = normalize_response(ApiFamily::Google, "gemini-2.5-flash", raw).unwrap();

        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["model"], "gemini-2.5-flash");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello");
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert_eq!(out["usage"]["prompt_tokens"], 7);
        assert_eq!(out["usage"]["completion_tokens"], 2);
        assert_eq!(out["usage"]["total_tokens"], 9);
    }

    #[test]
    fn anthropic_joins_text_blocks_and_sums_usage() {
        let raw = br#"{
            "id": "msg_01",
            "content": [
                {"type": "text", "text": "Hi "},
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 11, "output_tokens": 4}
        }"#;
        let out = normalize_response(ApiFamily::Anthropic, "claude-sonnet-4-5", raw).unwrap();

        assert_eq!(out["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["prompt_tokens"], 11);
        assert_eq!(out["usage"]["completion_tokens"], 4);
        assert_eq!(out["usage"]["total_tokens"], 15);
    }

    #[test]
    fn google_without_candidates_yields_empty_choice() {
        let out = normalize_response(ApiFamily::Google, "gemini-2.5-flash", b"{}").unwrap();
        assert_eq!(out["choices"][0]["message"]["content"], "");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 0);
    }
}
