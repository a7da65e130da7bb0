//! Google Gemini `generateContent` provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{fragment_stream, Payload};
use super::{status_error, FragmentStream, GenerationRequest, Generator};
use crate::error::GenerationError;

const PROVIDER: &str = "gemini";

/// Default Gemini API root.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Connection settings for [`GeminiGenerator`].
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// API root.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Overall request timeout, covering the whole streamed body.
    pub timeout: Duration,
}

/// Async Gemini client supporting one-shot and streamed generation.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiGenerator {
    /// Builds a new client.
    pub fn new(settings: GeminiSettings) -> Result<Self, GenerationError> {
        let key = settings.api_key.trim();
        if key.is_empty() {
            return Err(config_error("missing GEMINI_API_KEY"));
        }
        if settings.model.trim().is_empty() {
            return Err(config_error("missing model name"));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(key).map_err(|_| config_error("invalid API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(
        &self,
        url: String,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = GeminiRequest::from_request(request);
        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let resp = self
            .post(self.endpoint("generateContent"), request)
            .await?;
        let parsed: GeminiResponse = resp.json().await?;
        let answer = parsed.into_text()?;
        if answer.is_empty() {
            return Err(GenerationError::Empty { provider: PROVIDER });
        }
        debug!(model = %self.model, chars = answer.len(), "gemini answer received");
        Ok(answer)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let resp = self
            .post(self.endpoint("streamGenerateContent?alt=sse"), request)
            .await?;
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
    let parsed: GeminiResponse =
        serde_json::from_str(data).map_err(|err| GenerationError::Malformed {
            provider: PROVIDER,
            message: format!("{err} for payload {data}"),
        })?;
    let text = parsed.into_text()?;
    if text.is_empty() {
        Ok(Payload::Skip)
    } else {
        Ok(Payload::Fragment(text))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    system_instruction: GeminiSystemInstruction<'a>,
    generation_config: GeminiGenerationConfig,
}

impl<'a> GeminiRequest<'a> {
    fn from_request(request: &'a GenerationRequest) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiTextPart {
                    text: &request.prompt,
                }],
            }],
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: &request.system_instruction,
                }],
            },
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                thinking_config: request
                    .thinking_budget
                    .map(|thinking_budget| GeminiThinkingConfig { thinking_budget }),
            },
        }
    }
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Serialize)]
struct GeminiTextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, skipping reasoning parts.
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(error) = self.error {
            return Err(GenerationError::Api {
                provider: PROVIDER,
                message: error.message,
            });
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    message: String,
}
