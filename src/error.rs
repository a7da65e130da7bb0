//! Error taxonomy shared by the ingestion, retrieval and generation stages.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading a source document or the persisted serving assets.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened or read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The PDF parser rejected the document.
    #[error("failed to extract text from {}: {message}", .path.display())]
    Pdf {
        /// Offending path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// The extension does not map to a known document kind.
    #[error("unsupported document type for {} (expected .pdf, .txt or .md)", .path.display())]
    Unsupported {
        /// Offending path.
        path: PathBuf,
    },
    /// The source document could not be downloaded.
    #[error("failed to download {url}: {message}")]
    Download {
        /// Requested URL.
        url: String,
        /// Transport or status failure.
        message: String,
    },
    /// A persisted asset file is missing.
    #[error("asset file {} not found; run docrag-index first", .path.display())]
    MissingAsset {
        /// Expected location.
        path: PathBuf,
    },
    /// The persisted vector index could not be decoded.
    #[error("invalid index file: {0}")]
    Index(#[from] IndexError),
    /// The persisted chunk file could not be decoded.
    #[error("invalid chunk file: {0}")]
    Store(#[from] StoreError),
    /// Index and chunk file load fine individually but disagree with each other.
    #[error("persisted assets are inconsistent: {0}")]
    Inconsistent(#[from] RetrievalError),
}

/// Vector index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector does not match the index dimension.
    #[error("vector dimension {actual} does not match index dimension {expected}")]
    Dimension {
        /// Dimension fixed by the first insertion.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Zero-length vectors cannot be indexed.
    #[error("cannot index a zero-dimension vector")]
    ZeroDimension,
    /// Two entries share an id.
    #[error("duplicate index id {0}")]
    DuplicateId(usize),
    /// Header magic or version mismatch.
    #[error("unrecognized index format: {0}")]
    Format(String),
    /// Filesystem failure while persisting or reloading.
    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Binary encoding failure.
    #[error("index encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Chunk store persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("chunk store I/O failed for {}: {source}", .path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A JSONL line did not decode into a chunk record.
    #[error("invalid chunk record in {} at line {line}: {source}", .path.display())]
    Record {
        /// Offending path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// Serializing a record failed.
    #[error("failed to encode chunk record: {0}")]
    Encode(#[from] serde_json::Error),
    /// Two records share an id.
    #[error("duplicate chunk id {0}")]
    DuplicateId(usize),
}

/// Embedding service failures.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The client was configured with unusable settings.
    #[error("invalid embedder configuration: {0}")]
    Config(String),
    /// Transport-level failure.
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The service returned a different number of vectors than inputs.
    #[error("embedding service returned {actual} vectors for {expected} inputs")]
    Count {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
    /// Caller exceeded the configured batch size.
    #[error("batch of {len} exceeds configured max {max}")]
    BatchTooLarge {
        /// Requested batch length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The worker threads issuing requests stopped or could not start.
    #[error("embedding worker failure: {0}")]
    Worker(String),
}

/// Failures while answering a query from the index.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Nothing is indexed, so no query can be answered.
    #[error("the vector index is empty; no chunks are available for retrieval")]
    EmptyIndex,
    /// `k` must be at least one.
    #[error("top_k must be at least 1")]
    InvalidTopK,
    /// Index entries and chunk records do not line up.
    #[error("index and chunk store are misaligned: {0}")]
    Misaligned(String),
    /// Embedding the query failed.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbedError),
    /// The index rejected the query vector.
    #[error("index search failed: {0}")]
    Index(#[from] IndexError),
}

/// Generative model failures. Always per-request; never retried.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The provider was configured with unusable settings.
    #[error("invalid {provider} configuration: {message}")]
    Config {
        /// Provider name.
        provider: &'static str,
        /// What is wrong.
        message: String,
    },
    /// Transport-level failure, including timeouts and dropped connections.
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("{provider} returned {status}: {body}")]
    Status {
        /// Provider name.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The provider reported an error inside an otherwise successful response.
    #[error("{provider} reported an error: {message}")]
    Api {
        /// Provider name.
        provider: &'static str,
        /// Provider message.
        message: String,
    },
    /// The payload could not be decoded.
    #[error("malformed {provider} response: {message}")]
    Malformed {
        /// Provider name.
        provider: &'static str,
        /// Decoder message.
        message: String,
    },
    /// The provider returned no text at all.
    #[error("{provider} response contained no text")]
    Empty {
        /// Provider name.
        provider: &'static str,
    },
}

/// Errors surfaced by the answer operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The query was empty after trimming.
    #[error("query text must not be empty")]
    EmptyQuery,
    /// Retrieval failed; the service cannot answer right now.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Generation failed for this request.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// The blocking retrieval task panicked or was cancelled.
    #[error("retrieval task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// True when the failure means the service as a whole cannot answer, as
    /// opposed to a single request going wrong.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Retrieval(RetrievalError::EmptyIndex | RetrievalError::Misaligned(_))
        )
    }
}

/// Errors returned to callers of a serving state.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Startup asset loading failed; every request is refused.
    #[error("assets unavailable: {reason}")]
    AssetsUnavailable {
        /// Why the assets could not be loaded.
        reason: String,
    },
    /// The request itself failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Offline index build failures. Nothing is written when any stage fails.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The source document could not be read.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Embedding a chunk batch failed.
    #[error("failed to embed chunks: {0}")]
    Embed(#[from] EmbedError),
    /// The embeddings could not be indexed or the index could not be written.
    #[error("failed to build index: {0}")]
    Index(#[from] IndexError),
    /// The chunk file could not be written.
    #[error("failed to write chunks: {0}")]
    Store(#[from] StoreError),
    /// The output directory could not be created.
    #[error("failed to create {}: {source}", .path.display())]
    OutputDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A finished asset file could not be moved into place.
    #[error("failed to write {}: {source}", .path.display())]
    Persist {
        /// Final location of the file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}
