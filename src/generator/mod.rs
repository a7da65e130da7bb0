//! Generative model providers.
//!
//! A [`Generator`] turns a rendered prompt into an answer, either in one piece
//! or as a lazy stream of text fragments. Dropping a [`FragmentStream`] drops
//! the underlying HTTP response body, which closes the connection and stops
//! any further work on the provider side.

pub mod gemini;
pub mod openai;
mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::GenerationError;

/// Fixed reply for questions unrelated to the indexed documents.
pub const REFUSAL_MESSAGE: &str = "I'm sorry, I can't assist with that.";

/// Default system instruction: answer from context only, refuse off-topic requests.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "Provide a clear, relevant, and factual answer using the given context. Don't speak about the context, just use it to answer the question. If the users query is irrelevant to the context like 'count numbers from 1 to 10', respond with 'I'm sorry, I can't assist with that.'";

/// Low sampling temperature favouring factual, repeatable answers.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Incremental answer text. Finite, not restartable; drop to cancel.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Everything a provider needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Behavioural instruction sent as the system prompt.
    pub system_instruction: String,
    /// Rendered prompt holding the context block and the question.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_output_tokens: Option<u32>,
    /// Reasoning token budget for providers that support it; 0 disables
    /// intermediate reasoning.
    pub thinking_budget: Option<u32>,
}

/// Per-deployment generation parameters, turned into a request per prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// System instruction.
    pub system_instruction: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_output_tokens: Option<u32>,
    /// Reasoning token budget.
    pub thinking_budget: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: None,
            thinking_budget: Some(0),
        }
    }
}

impl GenerationSettings {
    /// Builds the request for a rendered prompt.
    pub fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            system_instruction: self.system_instruction.clone(),
            prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            thinking_budget: self.thinking_budget,
        }
    }
}

/// Hosted generative model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Produces the complete answer.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Starts an incremental generation. Fragments concatenate to the answer.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError>;
}

/// Reads a non-success response body for error reporting.
async fn status_error(provider: &'static str, resp: reqwest::Response) -> GenerationError {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    GenerationError::Status {
        provider,
        status,
        body,
    }
}
