//! OpenAI-compatible embedding client.
//!
//! Works against the hosted API as well as local model servers that expose the
//! same `/embeddings` route (text-embeddings-inference, llama.cpp, Ollama).

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Embedder;
use crate::error::EmbedError;

/// Connection and batching settings for [`OpenAiEmbedder`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderSettings {
    /// Bearer token; omitted from requests when `None` (local servers).
    pub api_key: Option<String>,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Embedding model identifier.
    pub model: String,
    /// Optional dimension override for models that support it.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per batch; 1 disables retries.
    pub max_attempts: usize,
    /// Max inputs per request.
    pub batch_size: usize,
    /// Worker threads issuing requests concurrently.
    pub workers: usize,
}

/// Embeddings client backed by a pool of worker threads.
///
/// Each worker owns a blocking HTTP client for its whole life, so the
/// embedder can be created and dropped on any thread, including inside an
/// async runtime. Calls block the caller until a worker replies.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    jobs: Sender<EmbeddingJob>,
    dimensions: Option<usize>,
    batch_size: usize,
}

struct EmbeddingJob {
    inputs: Vec<String>,
    reply: Sender<Result<Vec<Vec<f32>>, EmbedError>>,
}

impl OpenAiEmbedder {
    /// Validates settings and starts the workers.
    pub fn new(settings: OpenAiEmbedderSettings) -> Result<Self, EmbedError> {
        let model = settings.model.trim();
        if model.is_empty() {
            return Err(EmbedError::Config("missing embedding model name".into()));
        }
        let base_url = settings.base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(EmbedError::Config(format!(
                "embedding base URL must be http(s), got {base_url}"
            )));
        }
        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                let auth = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|_| EmbedError::Config("invalid embedding API key".into()))?;
                headers.insert(AUTHORIZATION, auth);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let request = RequestConfig {
            endpoint: format!("{base_url}/embeddings"),
            model: model.to_string(),
            dimensions: settings.dimensions,
            max_attempts: settings.max_attempts.max(1),
        };
        let workers = settings.workers.max(1);
        let (jobs, job_rx) = unbounded::<EmbeddingJob>();
        let (ready_tx, ready_rx) = bounded::<Result<(), EmbedError>>(workers);
        for worker_id in 0..workers {
            let worker = EmbeddingWorker {
                id: worker_id,
                headers: headers.clone(),
                timeout: settings.timeout,
                request: request.clone(),
            };
            let job_rx = job_rx.clone();
            let ready_tx = ready_tx.clone();
            thread::Builder::new()
                .name(format!("docrag-embed-{worker_id}"))
                .spawn(move || worker.run(job_rx, ready_tx))
                .map_err(|err| EmbedError::Worker(format!("failed to spawn worker: {err}")))?;
        }
        drop(ready_tx);
        for _ in 0..workers {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(EmbedError::Worker(
                        "embedding worker exited during startup".into(),
                    ))
                }
            }
        }
        Ok(Self {
            jobs,
            dimensions: settings.dimensions,
            batch_size: settings.batch_size.max(1),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(EmbedError::BatchTooLarge {
                len: inputs.len(),
                max: self.batch_size,
            });
        }
        let (reply, reply_rx) = bounded(1);
        let job = EmbeddingJob {
            inputs: inputs.iter().map(|text| text.to_string()).collect(),
            reply,
        };
        self.jobs
            .send(job)
            .map_err(|_| EmbedError::Worker("embedding workers have stopped".into()))?;
        reply_rx
            .recv()
            .map_err(|_| EmbedError::Worker("embedding worker dropped the request".into()))?
    }
}

#[derive(Debug, Clone)]
struct RequestConfig {
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_attempts: usize,
}

struct EmbeddingWorker {
    id: usize,
    headers: HeaderMap,
    timeout: Duration,
    request: RequestConfig,
}

impl EmbeddingWorker {
    /// Builds the client, then serves jobs until every sender is gone. The
    /// client is dropped here, on the worker thread.
    fn run(self, jobs: Receiver<EmbeddingJob>, ready: Sender<Result<(), EmbedError>>) {
        let client = match Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }
        drop(ready);
        for job in jobs.iter() {
            let inputs: Vec<&str> = job.inputs.iter().map(String::as_str).collect();
            let result = self.embed(&client, &inputs);
            if job.reply.send(result).is_err() {
                debug!(worker = self.id, "embedding caller went away before the reply");
            }
        }
        debug!(worker = self.id, "embedding worker stopped");
    }

    fn embed(&self, client: &Client, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbeddingRequest {
            model: &self.request.model,
            input: inputs,
            dimensions: self.request.dimensions,
        };
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let can_retry = attempt < self.request.max_attempts;
            match client.post(&self.request.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp.json()?;
                        return order_embeddings(parsed, inputs.len());
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && can_retry {
                        warn!(%status, attempt, "embedding request rejected; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbedError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if is_retryable_error(&err) && can_retry {
                        warn!(error = %err, attempt, "embedding request failed; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

fn order_embeddings(
    mut parsed: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(EmbedError::Count {
            expected,
            actual: parsed.data.len(),
        });
    }
    Ok(parsed
        .data
        .into_iter()
        .map(|entry| entry.embedding)
        .collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OpenAiEmbedderSettings {
        OpenAiEmbedderSettings {
            api_key: None,
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            model: "all-mpnet-base-v2".to_string(),
            dimensions: None,
            timeout: Duration::from_secs(1),
            max_attempts: 1,
            batch_size: 2,
            workers: 2,
        }
    }

    #[test]
    fn reorders_response_by_index() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#,
        )
        .expect("parse");
        let vectors = order_embeddings(parsed, 2).expect("ordered");
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#).expect("parse");
        assert!(matches!(
            order_embeddings(parsed, 2),
            Err(EmbedError::Count {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn validates_settings() {
        let mut bad = settings();
        bad.base_url = "ftp://example.com".to_string();
        assert!(matches!(OpenAiEmbedder::new(bad), Err(EmbedError::Config(_))));

        let mut unnamed = settings();
        unnamed.model = "  ".to_string();
        assert!(matches!(
            OpenAiEmbedder::new(unnamed),
            Err(EmbedError::Config(_))
        ));
    }

    #[test]
    fn oversized_batches_fail_before_sending() {
        let embedder = OpenAiEmbedder::new(settings()).expect("valid");
        assert!(matches!(
            embedder.embed_batch(&["a", "b", "c"]),
            Err(EmbedError::BatchTooLarge { len: 3, max: 2 })
        ));
    }

    #[test]
    fn unreachable_server_is_reported_by_the_worker() {
        let embedder = OpenAiEmbedder::new(settings()).expect("valid");
        assert!(matches!(
            embedder.embed_batch(&["attendance"]),
            Err(EmbedError::Http(_))
        ));
    }

    #[tokio::test]
    async fn created_and_dropped_inside_a_runtime() {
        let embedder = OpenAiEmbedder::new(settings()).expect("valid");
        let copy = embedder.clone();
        drop(embedder);
        assert_eq!(copy.batch_size(), 2);
        drop(copy);
    }
}
