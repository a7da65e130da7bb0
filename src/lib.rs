#![warn(missing_docs)]
//! Retrieval-augmented question answering over a fixed document corpus.
//!
//! Offline, [`indexer::build_index`] loads a source document, splits it into
//! sentence-group chunks, embeds them, and persists a flat vector index next
//! to the chunk records. At query time a [`ServingContext`] embeds the
//! question, retrieves the nearest chunks, and asks a hosted generative model
//! to answer from that context, either in one piece or as a stream.

pub mod assets;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod indexer;
pub mod loader;
pub mod pipeline;
pub mod retriever;
pub mod serving;
pub mod store;

pub use assets::{load_assets, load_retriever, AssetPaths};
pub use chunker::{chunk_pages, Chunk};
pub use embedder::Embedder;
pub use error::{
    BuildError, EmbedError, GenerationError, IndexError, LoadError, PipelineError,
    RetrievalError, ServeError, StoreError,
};
pub use generator::{FragmentStream, GenerationRequest, GenerationSettings, Generator};
pub use index::{FlatIndex, Neighbor};
pub use indexer::{build_index, BuildReport, BuildSettings};
pub use loader::{load_document, LoaderConfig, Page};
pub use pipeline::{
    answer_events, Answer, AnswerStream, PipelineSettings, PreparedQuery, ServingContext,
    StreamEvent,
};
pub use retriever::{RetrievedChunk, Retriever};
pub use serving::{HealthReport, HealthStatus, ServingState};
pub use store::ChunkStore;
