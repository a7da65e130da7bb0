//! Command-line and environment configuration shared by the binaries.
//!
//! Each argument group flattens into a binary's parser and converts into the
//! typed settings the library consumes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::assets::{AssetPaths, CHUNKS_FILE_NAME, INDEX_FILE_NAME};
use crate::chunker::DEFAULT_SENTENCES_PER_CHUNK;
use crate::embedder::openai::{OpenAiEmbedder, OpenAiEmbedderSettings};
use crate::error::{EmbedError, GenerationError};
use crate::generator::gemini::{
    GeminiGenerator, GeminiSettings, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL,
};
use crate::generator::openai::{
    OpenAiGenerator, OpenAiSettings, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL,
};
use crate::generator::{
    GenerationSettings, Generator, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_TEMPERATURE,
};
use crate::loader::{LoaderConfig, DEFAULT_PAGE_OFFSET};

/// Embedding service connection.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Base URL of the OpenAI-compatible embeddings API
    #[arg(
        long,
        env = "DOCRAG_EMBED_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub embed_base_url: String,

    /// Embedding model identifier; must match the one the index was built with
    #[arg(
        long,
        env = "DOCRAG_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embed_model: String,

    /// API key for the embeddings API (omit for local servers)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub embed_api_key: Option<String>,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "DOCRAG_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max number of chunks sent per embedding request
    #[arg(long, env = "DOCRAG_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "DOCRAG_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Attempts per embedding request (defaults to 5 for builds, 1 for queries)
    #[arg(long, env = "DOCRAG_EMBED_MAX_ATTEMPTS")]
    pub embed_max_attempts: Option<usize>,

    /// Concurrent embedding requests
    #[arg(long, env = "DOCRAG_EMBED_WORKERS", default_value_t = 2)]
    pub embed_workers: usize,
}

impl EmbedderArgs {
    /// Converts into client settings, using `default_attempts` when unset.
    pub fn settings(&self, default_attempts: usize) -> OpenAiEmbedderSettings {
        OpenAiEmbedderSettings {
            api_key: self.embed_api_key.clone(),
            base_url: self.embed_base_url.clone(),
            model: self.embed_model.clone(),
            dimensions: self.embed_dimensions,
            timeout: Duration::from_secs(self.embed_timeout_secs.max(1)),
            max_attempts: self.embed_max_attempts.unwrap_or(default_attempts).max(1),
            batch_size: self.embed_batch_size.max(1),
            workers: self.embed_workers.max(1),
        }
    }

    /// Builds the embeddings client.
    pub fn build_embedder(&self, default_attempts: usize) -> Result<OpenAiEmbedder, EmbedError> {
        OpenAiEmbedder::new(self.settings(default_attempts))
    }
}

/// Hosted generative model selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderArg {
    /// Google Gemini (default).
    Gemini,
    /// OpenAI chat completions or a compatible server.
    #[value(name = "openai")]
    OpenAi,
}

/// Generative model connection and sampling parameters.
#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    /// Generative model provider
    #[arg(long, env = "DOCRAG_LLM_PROVIDER", value_enum, default_value = "gemini")]
    pub llm_provider: ProviderArg,

    /// Gemini API key (required when --llm-provider gemini)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model identifier
    #[arg(long, env = "DOCRAG_GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// Gemini API root
    #[arg(long, env = "DOCRAG_GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    /// OpenAI API key (required when --llm-provider openai)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI chat model used for synthesis
    #[arg(long, env = "DOCRAG_OPENAI_MODEL", default_value = DEFAULT_OPENAI_MODEL)]
    pub openai_model: String,

    /// OpenAI-compatible API root
    #[arg(long, env = "DOCRAG_OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    /// Sampling temperature for the answer model
    #[arg(long, env = "DOCRAG_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Maximum tokens to request from the answer model
    #[arg(long, env = "DOCRAG_MAX_OUTPUT_TOKENS")]
    pub max_output_tokens: Option<u32>,

    /// Reasoning token budget (0 disables intermediate reasoning)
    #[arg(long, env = "DOCRAG_THINKING_BUDGET", default_value_t = 0)]
    pub thinking_budget: u32,

    /// Override for the system instruction sent with every request
    #[arg(long, env = "DOCRAG_SYSTEM_INSTRUCTION")]
    pub system_instruction: Option<String>,

    /// Max seconds for a whole generation, including a streamed body
    #[arg(long, env = "DOCRAG_LLM_TIMEOUT_SECS", default_value_t = 120)]
    pub llm_timeout_secs: u64,
}

impl GeneratorArgs {
    /// Sampling parameters applied to every request.
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            system_instruction: self
                .system_instruction
                .clone()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            thinking_budget: Some(self.thinking_budget),
        }
    }

    /// Builds the selected provider client.
    pub fn build_generator(&self) -> Result<Arc<dyn Generator>, GenerationError> {
        let timeout = Duration::from_secs(self.llm_timeout_secs.max(1));
        match self.llm_provider {
            ProviderArg::Gemini => {
                let api_key = self.gemini_api_key.clone().unwrap_or_default();
                let generator = GeminiGenerator::new(GeminiSettings {
                    api_key,
                    base_url: self.gemini_base_url.clone(),
                    model: self.gemini_model.clone(),
                    timeout,
                })?;
                Ok(Arc::new(generator))
            }
            ProviderArg::OpenAi => {
                let api_key = self.openai_api_key.clone().unwrap_or_default();
                let generator = OpenAiGenerator::new(OpenAiSettings {
                    api_key,
                    base_url: self.openai_base_url.clone(),
                    model: self.openai_model.clone(),
                    timeout,
                })?;
                Ok(Arc::new(generator))
            }
        }
    }
}

/// Locations of the serving assets.
#[derive(Args, Debug, Clone)]
pub struct AssetArgs {
    /// Vector index written by docrag-index
    #[arg(long, env = "DOCRAG_INDEX", default_value_os_t = default_asset(INDEX_FILE_NAME))]
    pub index: PathBuf,

    /// Chunk records written by docrag-index
    #[arg(long, env = "DOCRAG_CHUNKS", default_value_os_t = default_asset(CHUNKS_FILE_NAME))]
    pub chunks: PathBuf,
}

impl AssetArgs {
    /// Converts into asset paths.
    pub fn paths(&self) -> AssetPaths {
        AssetPaths {
            index: self.index.clone(),
            chunks: self.chunks.clone(),
        }
    }
}

fn default_asset(name: &str) -> PathBuf {
    PathBuf::from("assets").join(name)
}

/// Page numbering and chunk size for offline builds.
#[derive(Args, Debug, Clone)]
pub struct ChunkingArgs {
    /// Sentences grouped into each chunk
    #[arg(long, env = "DOCRAG_SENTENCES_PER_CHUNK", default_value_t = DEFAULT_SENTENCES_PER_CHUNK)]
    pub sentences_per_chunk: usize,

    /// Added to each zero-based page index to get the stored page number
    #[arg(
        long,
        env = "DOCRAG_PAGE_OFFSET",
        default_value_t = DEFAULT_PAGE_OFFSET,
        allow_negative_numbers = true
    )]
    pub page_offset: i64,
}

impl ChunkingArgs {
    /// Loader settings.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            page_offset: self.page_offset,
        }
    }
}

/// Installs a stderr `tracing` subscriber. `RUST_LOG` overrides
/// `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // a second call (tests, embedding binaries) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        embedder: EmbedderArgs,
        #[command(flatten)]
        generator: GeneratorArgs,
        #[command(flatten)]
        assets: AssetArgs,
        #[command(flatten)]
        chunking: ChunkingArgs,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "docrag",
            "--llm-provider",
            "openai",
            "--openai-api-key",
            "sk-test",
            "--page-offset",
            "-1",
            "--sentences-per-chunk",
            "3",
            "--index",
            "out/index.bin",
            "--embed-max-attempts",
            "2",
            "--thinking-budget",
            "64",
        ])
        .expect("parse");
        assert_eq!(cli.generator.llm_provider, ProviderArg::OpenAi);
        assert_eq!(cli.chunking.loader_config().page_offset, -1);
        assert_eq!(cli.chunking.sentences_per_chunk, 3);
        assert_eq!(cli.assets.paths().index, PathBuf::from("out/index.bin"));
        assert_eq!(cli.embedder.settings(5).max_attempts, 2);
        assert_eq!(cli.embedder.settings(5).workers, 2);
        assert_eq!(cli.generator.generation_settings().thinking_budget, Some(64));
        assert!(cli.generator.build_generator().is_ok());
    }

    #[test]
    fn missing_provider_key_is_a_config_error() {
        let mut cli = TestCli::try_parse_from(["docrag"]).expect("parse");
        cli.generator.gemini_api_key = None;
        assert!(matches!(
            cli.generator.build_generator(),
            Err(GenerationError::Config { .. })
        ));
    }

    #[test]
    fn blank_system_instruction_falls_back_to_default() {
        let mut cli = TestCli::try_parse_from(["docrag"]).expect("parse");
        cli.generator.system_instruction = Some("   ".into());
        assert_eq!(
            cli.generator.generation_settings().system_instruction,
            DEFAULT_SYSTEM_INSTRUCTION
        );
    }
}
