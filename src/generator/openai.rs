//! OpenAI chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{fragment_stream, Payload};
use super::{status_error, FragmentStream, GenerationRequest, Generator};
use crate::error::GenerationError;

const PROVIDER: &str = "openai";

/// Default API root.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Connection settings for [`OpenAiGenerator`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Bearer token.
    pub api_key: String,
    /// API root.
    pub base_url: String,
    /// Chat model identifier.
    pub model: String,
    /// Overall request timeout.
    pub timeout: Duration,
}

/// Async chat completions client.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiGenerator {
    /// Builds a new client.
    pub fn new(settings: OpenAiSettings) -> Result<Self, GenerationError> {
        let key = settings.api_key.trim();
        if key.is_empty() {
            return Err(config_error("missing OPENAI_API_KEY"));
        }
        if settings.model.trim().is_empty() {
            return Err(config_error("missing model name"));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {key}");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| config_error("invalid API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: settings.model,
        })
    }

    async fn post(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = ChatRequest::new(&self.model, request, stream);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let resp = self.post(request, false).await?;
        let parsed: ChatResponse = resp.json().await?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(GenerationError::Empty { provider: PROVIDER });
        }
        debug!(model = %self.model, chars = answer.len(), "openai answer received");
        Ok(answer)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let resp = self.post(request, true).await?;
        Ok(fragment_stream(resp.bytes_stream(), parse_stream_event))
    }
}

fn config_error(message: &str) -> GenerationError {
    GenerationError::Config {
        provider: PROVIDER,
        message: message.to_string(),
    }
}

fn parse_stream_event(data: &str) -> Result<Payload, GenerationError> {
    if data.trim() == "[DONE]" {
        return Ok(Payload::Done);
    }
    let parsed: ChatChunk = serde_json::from_str(data).map_err(|err| GenerationError::Malformed {
        provider: PROVIDER,
        message: format!("{err} for payload {data}"),
    })?;
    if let Some(error) = parsed.error {
        return Err(GenerationError::Api {
            provider: PROVIDER,
            message: error.message,
        });
    }
    let text: String = parsed
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if text.is_empty() {
        Ok(Payload::Skip)
    } else {
        Ok(Payload::Fragment(text))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, request: &'a GenerationRequest, stream: bool) -> Self {
        Self {
            model,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
