use bytes::Bytes;
use serde_json::Value;

use polygate_common::{ApiFamily, ProviderKind};
use polygate_protocol::anthropic;
use polygate_protocol::gemini;
use polygate_protocol::openai::ChatCompletionRequest;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: i64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("request body is not valid for this endpoint: {0}")]
    InvalidBody(String),
}

impl From<serde_json::Error> for TranslateError {
    fn from(err: serde_json::Error) -> Self {
        TranslateError::InvalidBody(err.to_string())
    }
}

/// Public endpoint being proxied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
    Embeddings,
}

impl Endpoint {
    pub fn public_path(self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "/v1/chat/completions",
            Endpoint::Completions => "/v1/completions",
            Endpoint::Embeddings => "/v1/embeddings",
        }
    }

    /// Completion-style endpoints map to Gemini `generateContent`;
    /// everything else maps to `predict`.
    pub fn is_completion(self) -> bool {
        !matches!(self, Endpoint::Embeddings)
    }
}

/// Decrypted authentication material for one upstream call. Never logged.
#[derive(Clone)]
pub enum AuthMaterial {
    Bearer(String),
    /// Raw static credential interpreted as a JSON header map, falling
    /// back to a single `Name:Value` pair.
    Header(String),
    None,
}

impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMaterial::Bearer(_) => f.write_str("AuthMaterial::Bearer(…)"),
            AuthMaterial::Header(_) => f.write_str("AuthMaterial::Header(…)"),
            AuthMaterial::None => f.write_str("AuthMaterial::None"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Map the caller's OpenAI-shaped body onto the provider-native request.
pub fn prepare_upstream_request(
    kind: ProviderKind,
    endpoint: Endpoint,
    base_url: &str,
    upstream_model: &str,
    streaming: bool,
    request_id: &str,
    auth: &AuthMaterial,
    body: &Value,
) -> Result<PreparedRequest, TranslateError> {
    let base = base_url.trim_end_matches('/');
    let (url, payload) = match kind.family() {
        ApiFamily::OpenAiLike => {
            let url = format!("{base}{}", endpoint.public_path());
            let mut payload = body.clone();
            if let Some(map) = payload.as_object_mut() {
                map.insert("model".to_string(), Value::String(upstream_model.to_string()));
            }
            (url, payload)
        }
        ApiFamily::Google => {
            let action = match (endpoint.is_completion(), streaming) {
                (true, true) => "streamGenerateContent?alt=sse",
                (true, false) => "generateContent",
                (false, _) => "predict",
            };
            let url = format!("{base}/v1beta/models/{upstream_model}:{action}");
            let payload = if endpoint.is_completion() {
                serde_json::to_value(google_generate_body(body)?)?
            } else {
                let mut payload = body.clone();
                if let Some(map) = payload.as_object_mut() {
                    map.remove("model");
                }
                payload
            };
            (url, payload)
        }
        ApiFamily::Anthropic => {
            let url = format!("{base}/v1/messages");
            let payload = serde_json::to_value(anthropic_messages_body(body, upstream_model)?)?;
            (url, payload)
        }
    };

    let mut headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("x-request-id".to_string(), request_id.to_string()),
    ];
    if kind.family() == ApiFamily::Anthropic {
        headers.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
    }
    headers.extend(auth_headers(auth));

    Ok(PreparedRequest {
        url,
        headers,
        body: Bytes::from(serde_json::to_vec(&payload)?),
    })
}

fn auth_headers(auth: &AuthMaterial) -> Vec<(String, String)> {
    match auth {
        AuthMaterial::Bearer(token) => {
            vec![("authorization".to_string(), format!("Bearer {token}"))]
        }
        AuthMaterial::Header(raw) => {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
                return map
                    .into_iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|value| (name, value.to_string()))
                    })
                    .collect();
            }
            match raw.split_once(':') {
                Some((name, value)) => {
                    vec![(name.trim().to_string(), value.trim().to_string())]
                }
                None => Vec::new(),
            }
        }
        AuthMaterial::None => Vec::new(),
    }
}

fn google_generate_body(body: &Value) -> Result<gemini::GenerateContentRequest, TranslateError> {
    let request: ChatCompletionRequest = serde_json::from_value(body.clone())?;

    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for message in &request.messages {
        let text = message.content.flatten();
        if message.role == "system" {
            system_texts.push(text);
            continue;
        }
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        contents.push(gemini::Content {
            role: Some(role.to_string()),
            parts: vec![gemini::Part { text: Some(text) }],
        });
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(gemini::Content {
            role: None,
            parts: vec![gemini::Part {
                text: Some(system_texts.join("\n")),
            }],
        })
    };

    let generation_config = if request.temperature.is_some()
        || request.top_p.is_some()
        || request.max_tokens.is_some()
    {
        Some(gemini::GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
        })
    } else {
        None
    };

    Ok(gemini::GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
    })
}

fn anthropic_messages_body(
    body: &Value,
    upstream_model: &str,
) -> Result<anthropic::MessagesRequest, TranslateError> {
    let request: ChatCompletionRequest = serde_json::from_value(body.clone())?;

    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        let text = message.content.flatten();
        if message.role == "system" {
            system_texts.push(text);
            continue;
        }
        messages.push(anthropic::Message {
            role: message.role.clone(),
            content: text,
        });
    }

    Ok(anthropic::MessagesRequest {
        model: upstream_model.to_string(),
        max_tokens: request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        messages,
        system: if system_texts.is_empty() {
            None
        } else {
            Some(system_texts.join("\n"))
        },
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
    })
}
