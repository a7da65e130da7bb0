#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docrag::error::{EmbedError, GenerationError};
use docrag::generator::REFUSAL_MESSAGE;
use docrag::indexer::build_from_pages;
use docrag::loader::{pages_from_raw, LoaderConfig};
use docrag::{
    Embedder, FragmentStream, GenerationRequest, Generator, PipelineSettings, Retriever,
    ServingContext,
};
use futures_util::{stream, StreamExt};

/// Bag-of-words counts over a fixed vocabulary.
pub struct VocabularyEmbedder {
    vocabulary: Vec<&'static str>,
}

impl VocabularyEmbedder {
    pub fn handbook() -> Self {
        Self {
            vocabulary: vec![
                "attendance",
                "late",
                "submissions",
                "day",
                "exam",
                "fees",
                "library",
            ],
        }
    }
}

impl Embedder for VocabularyEmbedder {
    fn batch_size(&self) -> usize {
        4
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.vocabulary.len())
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(inputs
            .iter()
            .map(|text| {
                let lowered = text.to_lowercase();
                let words: Vec<&str> = lowered
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|word| !word.is_empty())
                    .collect();
                self.vocabulary
                    .iter()
                    .map(|term| words.iter().filter(|word| *word == term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Replays fixed fragments, counting how many were actually produced.
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    produced: Arc<AtomicUsize>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            produced: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.produced.fetch_add(self.fragments.len(), Ordering::SeqCst);
        Ok(self.fragments.concat())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let produced = Arc::clone(&self.produced);
        let fragments = stream::iter(self.fragments.clone()).map(move |fragment| {
            produced.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GenerationError>(fragment)
        });
        Ok(Box::pin(fragments))
    }
}

/// Streams `before_failure` fragments, then fails.
pub struct FailingGenerator {
    pub before_failure: Vec<&'static str>,
}

#[async_trait]
impl Generator for FailingGenerator {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Status {
            provider: "failing",
            status: 503,
            body: "overloaded".into(),
        })
    }

    async fn generate_stream(
        &self,
        _request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let mut items: Vec<Result<String, GenerationError>> = self
            .before_failure
            .iter()
            .map(|fragment| Ok(fragment.to_string()))
            .collect();
        items.push(Err(GenerationError::Malformed {
            provider: "failing",
            message: "truncated event".into(),
        }));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Answers from keywords in the prompt's question line; refuses anything else.
pub struct KeywordGenerator;

#[async_trait]
impl Generator for KeywordGenerator {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let question = request
            .prompt
            .rsplit("Question: ")
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let answer = if question.contains("attendance") {
            "Attendance must be at least 75%."
        } else if question.contains("late") {
            "Late submissions lose 10% per day."
        } else {
            REFUSAL_MESSAGE
        };
        Ok(answer.to_string())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let answer = self.generate(request).await?;
        Ok(Box::pin(stream::once(async move {
            Ok::<_, GenerationError>(answer)
        })))
    }
}

/// Builds a serving context over `pages`, one sentence per chunk.
pub fn context_over(pages: &[&str], generator: Arc<dyn Generator>) -> ServingContext {
    let embedder = Arc::new(VocabularyEmbedder::handbook());
    let pages = pages_from_raw(pages.iter().copied(), &LoaderConfig { page_offset: 0 });
    let (index, store) = build_from_pages(&pages, 1, embedder.as_ref()).expect("build");
    let retriever = Retriever::new(embedder, index, store).expect("aligned");
    ServingContext::new(retriever, generator, PipelineSettings::default())
}
