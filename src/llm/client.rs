//! OpenRouter completion gateway
//!
//! Three call shapes: single-shot, SSE streaming (fragments delivered in
//! order to a caller-supplied sink), and JSON mode for the planning phase.
//! Failures map to `OrchestratorError::Generation`; there is no retry loop,
//! every failure is terminal for the job that made the call.

use crate::error::OrchestratorError;
use crate::prompt::Prompt;
use crate::util::truncate;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter chat completions endpoint.
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Whole-request timeout, generous because streamed whole-file rewrites are slow.
const REQUEST_TIMEOUT_SECS: u64 = 300;

const MAX_COMPLETION_TOKENS: u32 = 16_384;

/// Ordered sink for streamed completion fragments.
pub type FragmentSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// The completion gateway consumed by the pipelines.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Single-shot completion returning the full text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, OrchestratorError>;

    /// Streaming completion. Fragments are delivered to `on_fragment` in the
    /// order the provider sends them; the aggregate is returned at stream end.
    async fn complete_streaming(
        &self,
        prompt: &Prompt,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, OrchestratorError>;

    /// JSON-mode completion. Returns the raw response text; callers parse and
    /// validate it themselves.
    async fn complete_structured(&self, prompt: &Prompt) -> Result<String, OrchestratorError>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Deserialize, Default)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Default)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Completion gateway backed by OpenRouter.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    fn request(&self, prompt: &Prompt, stream: bool, json_mode: bool) -> ChatRequest {
        let response_format = if json_mode {
            Some(ResponseFormat {
                format_type: "json_object".to_string(),
            })
        } else {
            None
        };

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream,
            response_format,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, OrchestratorError> {
        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/cameronspears/fanout")
            .header("X-Title", "fanout")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| OrchestratorError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(OrchestratorError::Generation(api_error_message(
            status.as_u16(),
            &text,
        )))
    }
}

fn api_error_message(status: u16, body: &str) -> String {
    match status {
        401 => "invalid API key".to_string(),
        429 => "rate limited by the completion provider".to_string(),
        500..=599 => format!("completion provider server error ({})", status),
        _ => format!("API error {}: {}", status, truncate(body, 200)),
    }
}

/// Apply one SSE `data:` payload to the aggregate. Returns true on `[DONE]`.
fn apply_sse_payload(
    payload: &str,
    aggregate: &mut String,
    on_fragment: &mut (dyn FnMut(&str) + Send),
) -> Result<bool, OrchestratorError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(false);
    }
    if payload == "[DONE]" {
        return Ok(true);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| OrchestratorError::Generation(format!("bad stream chunk: {}", e)))?;
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                aggregate.push_str(&text);
                on_fragment(&text);
            }
        }
    }
    Ok(false)
}

#[async_trait]
impl Completion for OpenRouterClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, OrchestratorError> {
        let request = self.request(prompt, false, false);
        let response = self.send(&request).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Generation(format!("bad response: {}", e)))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_streaming(
        &self,
        prompt: &Prompt,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, OrchestratorError> {
        let request = self.request(prompt, true, false);
        let response = self.send(&request).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut aggregate = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk
                .map_err(|e| OrchestratorError::Generation(format!("stream read failed: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let mut line = buffer[..pos].to_string();
                buffer.drain(..=pos);
                if line.ends_with('\r') {
                    line.pop();
                }
                if let Some(data) = line.strip_prefix("data:") {
                    if apply_sse_payload(data, &mut aggregate, on_fragment)? {
                        return Ok(aggregate);
                    }
                }
            }
        }

        // Provider closed the stream without a [DONE]; a trailing payload may
        // still be sitting in the buffer.
        if let Some(data) = buffer.trim().strip_prefix("data:") {
            let _ = apply_sse_payload(data, &mut aggregate, on_fragment)?;
        }
        Ok(aggregate)
    }

    async fn complete_structured(&self, prompt: &Prompt) -> Result<String, OrchestratorError> {
        let request = self.request(prompt, false, true);
        let response = self.send(&request).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Generation(format!("bad response: {}", e)))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}
