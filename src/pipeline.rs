//! Query orchestration: retrieve, assemble, generate.
//!
//! A [`ServingContext`] is built once at startup and shared behind an `Arc`.
//! It holds no mutable state, so concurrent requests need no locking.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::{apply_token_budget, assemble_context, build_prompt};
use crate::error::{GenerationError, PipelineError};
use crate::generator::{FragmentStream, GenerationRequest, GenerationSettings, Generator};
use crate::retriever::{RetrievedChunk, Retriever};

/// Chunks retrieved per query when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 5;

/// Query-time knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// `k` used when a request does not carry one.
    pub default_top_k: usize,
    /// Optional cap on estimated context tokens.
    pub token_budget: Option<usize>,
    /// Parameters forwarded to the generator.
    pub generation: GenerationSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            token_budget: None,
            generation: GenerationSettings::default(),
        }
    }
}

/// Retrieval output ready for generation.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Trimmed question text.
    pub question: String,
    /// Chunks that made it into the context, most relevant first.
    pub sources: Vec<RetrievedChunk>,
    /// Newline-joined context block.
    pub context: String,
    /// Request handed to the generator.
    pub request: GenerationRequest,
}

/// Complete answer with the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Generated text.
    pub text: String,
    /// Retrieved chunks used as context.
    pub sources: Vec<RetrievedChunk>,
}

/// Shared, read-only serving resources.
pub struct ServingContext {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    settings: PipelineSettings,
}

impl ServingContext {
    /// Bundles the loaded retriever with a generator.
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            retriever: Arc::new(retriever),
            generator,
            settings,
        }
    }

    /// Underlying retriever.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Active settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs retrieval and renders the prompt without calling the generator.
    pub async fn prepare(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<PreparedQuery, PipelineError> {
        let question = query.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        let k = top_k.unwrap_or(self.settings.default_top_k);
        let retriever = Arc::clone(&self.retriever);
        let owned = question.to_string();
        let hits = tokio::task::spawn_blocking(move || retriever.retrieve(&owned, k))
            .await
            .map_err(|err| PipelineError::Task(err.to_string()))??;
        let sources = apply_token_budget(hits, self.settings.token_budget);
        let context = assemble_context(&sources);
        let request = self
            .settings
            .generation
            .request(build_prompt(&context, question));
        debug!(
            k,
            sources = sources.len(),
            context_chars = context.len(),
            "prepared query"
        );
        Ok(PreparedQuery {
            question: question.to_string(),
            sources,
            context,
            request,
        })
    }

    /// Answers `query` in one piece.
    ///
    /// Dropping the future during retrieval skips generation, but the query
    /// embedding already running on the blocking pool finishes in the
    /// background and its result is discarded.
    pub async fn answer(&self, query: &str, top_k: Option<usize>) -> Result<Answer, PipelineError> {
        let prepared = self.prepare(query, top_k).await?;
        let text = self.generator.generate(&prepared.request).await?;
        Ok(Answer {
            text,
            sources: prepared.sources,
        })
    }

    /// Answers `query` as a stream of fragments.
    ///
    /// Retrieval and the provider handshake complete before this returns, so
    /// failures there surface as an `Err` rather than inside the stream.
    ///
    /// Cancellation is cooperative. Dropping the returned stream closes the
    /// provider connection. Dropping the future before it resolves never
    /// starts generation, although an embedding call already in flight runs
    /// to completion on the blocking pool.
    pub async fn answer_stream(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<AnswerStream, PipelineError> {
        let prepared = self.prepare(query, top_k).await?;
        let fragments = self.generator.generate_stream(&prepared.request).await?;
        debug!(provider = self.generator.name(), "answer stream opened");
        Ok(AnswerStream {
            sources: prepared.sources,
            fragments,
            finished: false,
        })
    }
}

/// Streamed answer. Ends after the provider finishes or after the first
/// error; dropping it cancels the provider request.
pub struct AnswerStream {
    sources: Vec<RetrievedChunk>,
    fragments: FragmentStream,
    finished: bool,
}

impl AnswerStream {
    /// Chunks the answer is grounded on.
    pub fn sources(&self) -> &[RetrievedChunk] {
        &self.sources
    }

    /// Adapts the stream into wire events; see [`answer_events`].
    pub fn into_events(self) -> impl Stream<Item = StreamEvent> + Send {
        answer_events(self)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.fragments.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                warn!(error = %err, "answer stream failed mid-generation");
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

/// One message of the streaming wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Answer text; empty on the final event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    /// Failure message on a terminal error event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True on the last event of a stream.
    pub done: bool,
}

impl StreamEvent {
    /// A fragment of answer text.
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            chunk: Some(text.into()),
            error: None,
            done: false,
        }
    }

    /// Successful end of stream.
    pub fn done() -> Self {
        Self {
            chunk: Some(String::new()),
            error: None,
            done: true,
        }
    }

    /// Failed end of stream.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunk: None,
            error: Some(message.into()),
            done: true,
        }
    }

    /// True for the done and error events.
    pub fn is_terminal(&self) -> bool {
        self.done
    }
}

/// Turns an answer stream into events ending with exactly one terminal event.
///
/// Fragments already emitted stay emitted when a later error occurs.
pub fn answer_events(answer: AnswerStream) -> impl Stream<Item = StreamEvent> + Send {
    stream::unfold(Some(answer), |state| async move {
        let mut answer = state?;
        match answer.next().await {
            Some(Ok(text)) => Some((StreamEvent::fragment(text), Some(answer))),
            Some(Err(err)) => Some((StreamEvent::error(err.to_string()), None)),
            None => Some((StreamEvent::done(), None)),
        }
    })
}
