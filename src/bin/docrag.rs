use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use docrag::config::{init_tracing, AssetArgs, EmbedderArgs, GeneratorArgs};
use docrag::pipeline::DEFAULT_TOP_K;
use docrag::{load_retriever, PipelineSettings, RetrievedChunk, ServingState, StreamEvent};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

/// Query-time embedding calls are not retried.
const QUERY_EMBED_ATTEMPTS: usize = 1;

#[derive(Parser, Debug)]
#[command(
    name = "docrag",
    about = "Answer questions from an indexed document with a hosted language model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the complete answer
    Answer {
        #[command(flatten)]
        query: QueryArgs,

        /// Only print the retrieved context and prompt (skip the LLM call)
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Print the retrieved chunks before the answer
        #[arg(long, default_value_t = false)]
        show_sources: bool,

        #[command(flatten)]
        serve: ServeArgs,
    },
    /// Print the answer as it is generated
    Stream {
        #[command(flatten)]
        query: QueryArgs,

        /// Emit JSON-lines stream events instead of raw text
        #[arg(long, default_value_t = false)]
        events: bool,

        #[command(flatten)]
        serve: ServeArgs,
    },
    /// Print the nearest chunks without generating an answer
    Retrieve {
        #[command(flatten)]
        query: QueryArgs,

        /// Emit one JSON object per chunk
        #[arg(long, default_value_t = false)]
        json: bool,

        #[command(flatten)]
        assets: AssetArgs,

        #[command(flatten)]
        embedder: EmbedderArgs,
    },
    /// Report whether the assets load and a provider is configured
    Health {
        #[command(flatten)]
        serve: ServeArgs,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Question to answer
    #[arg(long)]
    query: String,

    /// Number of chunks retrieved as context
    #[arg(long, env = "DOCRAG_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Optional cap on estimated context tokens
    #[arg(long, env = "DOCRAG_TOKEN_BUDGET")]
    token_budget: Option<usize>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    assets: AssetArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    generator: GeneratorArgs,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing("warn");

    match cli.command {
        Command::Answer {
            query,
            dry_run,
            show_sources,
            serve,
        } => {
            let state = load_state(&serve, query.top_k, query.token_budget)?;
            let runtime = runtime()?;
            runtime.block_on(answer(&state, &query, dry_run, show_sources))
        }
        Command::Stream {
            query,
            events,
            serve,
        } => {
            let state = load_state(&serve, query.top_k, query.token_budget)?;
            let runtime = runtime()?;
            if events {
                runtime.block_on(stream_events(&state, &query))
            } else {
                runtime.block_on(stream_text(&state, &query))
            }
        }
        Command::Retrieve {
            query,
            json,
            assets,
            embedder,
        } => {
            let embedder = embedder
                .build_embedder(QUERY_EMBED_ATTEMPTS)
                .context("failed to configure embedding client")?;
            let question = query.query.trim();
            ensure!(!question.is_empty(), "query text must not be empty");
            let retriever = load_retriever(&assets.paths(), Arc::new(embedder))?;
            let hits = retriever.retrieve(question, query.top_k)?;
            for hit in &hits {
                if json {
                    println!("{}", serde_json::to_string(hit)?);
                } else {
                    print_hit(hit);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Health { serve } => {
            let state = load_state(&serve, DEFAULT_TOP_K, None).unwrap_or_else(|err| {
                ServingState::Unavailable {
                    reason: format!("{err:#}"),
                }
            });
            let report = state.health();
            println!("{}", serde_json::to_string(&report)?);
            Ok(if report.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

/// Builds the serving state. Client misconfiguration is an error; missing or
/// broken assets yield an unavailable state.
fn load_state(
    serve: &ServeArgs,
    top_k: usize,
    token_budget: Option<usize>,
) -> Result<ServingState> {
    let embedder = serve
        .embedder
        .build_embedder(QUERY_EMBED_ATTEMPTS)
        .context("failed to configure embedding client")?;
    let generator = serve
        .generator
        .build_generator()
        .context("failed to configure generation provider")?;
    let settings = PipelineSettings {
        default_top_k: top_k,
        token_budget,
        generation: serve.generator.generation_settings(),
    };
    Ok(ServingState::load(
        &serve.assets.paths(),
        Arc::new(embedder),
        generator,
        settings,
    ))
}

async fn answer(
    state: &ServingState,
    query: &QueryArgs,
    dry_run: bool,
    show_sources: bool,
) -> Result<ExitCode> {
    let context = state.context()?;
    if dry_run {
        let prepared = context.prepare(&query.query, None).await?;
        println!("--- Retrieved Context ---\n{}\n", prepared.context);
        println!("--- Prompt ---\n{}\n", prepared.request.prompt);
        println!("dry-run enabled; skipping LLM call.");
        return Ok(ExitCode::SUCCESS);
    }
    let answer = context.answer(&query.query, None).await?;
    if show_sources {
        println!("--- Sources ---");
        for hit in &answer.sources {
            print_hit(hit);
        }
        println!("--- Answer ---");
    }
    println!("{}", answer.text);
    Ok(ExitCode::SUCCESS)
}

async fn stream_text(state: &ServingState, query: &QueryArgs) -> Result<ExitCode> {
    let mut fragments = state.answer_stream(&query.query, None).await?;
    let mut stdout = tokio::io::stdout();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        let next = tokio::select! {
            next = fragments.next() => next,
            _ = &mut interrupt => {
                warn!("interrupted; cancelling generation");
                stdout.write_all(b"\n").await?;
                return Ok(ExitCode::from(130));
            }
        };
        match next {
            Some(Ok(text)) => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            Some(Err(err)) => {
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                return Err(err).context("generation failed mid-stream");
            }
            None => break,
        }
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(ExitCode::SUCCESS)
}

async fn stream_events(state: &ServingState, query: &QueryArgs) -> Result<ExitCode> {
    let mut stdout = tokio::io::stdout();
    let answer = match state.answer_stream(&query.query, None).await {
        Ok(answer) => answer,
        Err(err) => {
            write_event(&mut stdout, &StreamEvent::error(err.to_string())).await?;
            return Ok(ExitCode::FAILURE);
        }
    };
    let events = answer.into_events();
    tokio::pin!(events);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = &mut interrupt => {
                warn!("interrupted; cancelling generation");
                write_event(&mut stdout, &StreamEvent::error("cancelled")).await?;
                return Ok(ExitCode::from(130));
            }
        };
        let Some(event) = event else {
            return Ok(ExitCode::SUCCESS);
        };
        write_event(&mut stdout, &event).await?;
        if event.is_terminal() {
            let failed = event.error.is_some();
            return Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        }
    }
}

async fn write_event<W>(out: &mut W, event: &StreamEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

fn print_hit(hit: &RetrievedChunk) {
    println!(
        "[{:.4}] chunk {} (page {})\n{}\n",
        hit.distance, hit.chunk.id, hit.chunk.page_number, hit.chunk.text
    );
}
