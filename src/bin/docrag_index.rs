use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docrag::config::{init_tracing, ChunkingArgs, EmbedderArgs};
use docrag::{build_index, AssetPaths, BuildSettings};

const BUILD_EMBED_ATTEMPTS: usize = 5;

#[derive(Parser, Debug)]
#[command(
    name = "docrag-index",
    about = "Build the vector index and chunk file for a source document"
)]
struct IndexCli {
    /// Source document (.pdf, .txt or .md)
    #[arg(long, env = "DOCRAG_SOURCE")]
    source: PathBuf,

    /// Downloaded into --source when that file does not exist
    #[arg(long, env = "DOCRAG_SOURCE_URL")]
    source_url: Option<String>,

    /// Directory receiving index.bin and chunks.jsonl
    #[arg(long, env = "DOCRAG_OUT_DIR", default_value = "assets")]
    out_dir: PathBuf,

    #[command(flatten)]
    chunking: ChunkingArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = IndexCli::parse();
    init_tracing("info");

    let embedder = cli
        .embedder
        .build_embedder(BUILD_EMBED_ATTEMPTS)
        .context("failed to configure embedding client")?;
    let settings = BuildSettings {
        source: cli.source.clone(),
        source_url: cli.source_url.clone(),
        output: AssetPaths::in_dir(&cli.out_dir),
        loader: cli.chunking.loader_config(),
        sentences_per_chunk: cli.chunking.sentences_per_chunk,
    };
    let report = build_index(&settings, &embedder)
        .with_context(|| format!("failed to index {}", cli.source.display()))?;
    println!(
        "indexed {} chunks from {} pages -> {} + {}",
        report.chunks,
        report.pages,
        report.output.index.display(),
        report.output.chunks.display()
    );
    Ok(())
}
