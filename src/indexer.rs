//! Offline build: load, chunk, embed, index, persist.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use tracing::{info, warn};

use crate::assets::AssetPaths;
use crate::chunker::{chunk_pages, DEFAULT_SENTENCES_PER_CHUNK};
use crate::embedder::{embed_all, Embedder};
use crate::error::BuildError;
use crate::index::FlatIndex;
use crate::loader::{fetch_document, load_document, LoaderConfig, Page};
use crate::store::ChunkStore;

/// Inputs of one offline build.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Source document.
    pub source: PathBuf,
    /// Fetched into `source` when that file does not exist yet.
    pub source_url: Option<String>,
    /// Where the index and chunk files are written.
    pub output: AssetPaths,
    /// Page numbering.
    pub loader: LoaderConfig,
    /// Sentences grouped into each chunk.
    pub sentences_per_chunk: usize,
}

impl BuildSettings {
    /// Default chunking and page numbering for `source`, writing into `out_dir`.
    pub fn new(source: impl Into<PathBuf>, out_dir: impl AsRef<Path>) -> Self {
        Self {
            source: source.into(),
            source_url: None,
            output: AssetPaths::in_dir(out_dir),
            loader: LoaderConfig::default(),
            sentences_per_chunk: DEFAULT_SENTENCES_PER_CHUNK,
        }
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Pages read from the source.
    pub pages: usize,
    /// Chunks indexed.
    pub chunks: usize,
    /// Embedding dimension; `None` for an empty build.
    pub dimension: Option<usize>,
    /// Files written.
    pub output: AssetPaths,
}

/// Runs the whole build and writes both asset files.
pub fn build_index(
    settings: &BuildSettings,
    embedder: &dyn Embedder,
) -> Result<BuildReport, BuildError> {
    if !settings.source.exists() {
        if let Some(url) = settings.source_url.as_deref() {
            info!(url, path = %settings.source.display(), "source document missing; downloading");
            fetch_document(url, &settings.source)?;
        }
    }
    let pages = load_document(&settings.source, &settings.loader)?;
    let (index, store) = build_from_pages(&pages, settings.sentences_per_chunk, embedder)?;
    write_assets(&settings.output, &index, &store)?;
    let report = BuildReport {
        pages: pages.len(),
        chunks: store.len(),
        dimension: index.dimension(),
        output: settings.output.clone(),
    };
    info!(
        pages = report.pages,
        chunks = report.chunks,
        dimension = report.dimension,
        index = %report.output.index.display(),
        chunks_file = %report.output.chunks.display(),
        "index build complete"
    );
    Ok(report)
}

/// Chunks and embeds pages into an index and its matching chunk store.
pub fn build_from_pages(
    pages: &[Page],
    sentences_per_chunk: usize,
    embedder: &dyn Embedder,
) -> Result<(FlatIndex, ChunkStore), BuildError> {
    let chunks = chunk_pages(pages, sentences_per_chunk);
    info!(
        pages = pages.len(),
        chunks = chunks.len(),
        sentences_per_chunk,
        "chunked source pages"
    );
    let mut index = FlatIndex::new();
    if chunks.is_empty() {
        warn!("source produced no chunks; the index will be empty and queries will fail");
    } else {
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = embed_all(embedder, &texts)?;
        index.add_with_ids(chunks.iter().map(|chunk| chunk.id).zip(vectors))?;
    }
    let store = ChunkStore::new(chunks)?;
    index.set_chunk_fingerprint(store.fingerprint());
    Ok((index, store))
}

/// Writes the index and chunk files, creating parent directories.
///
/// Both files are staged under temporary names next to their targets and
/// only moved into place once both are complete. If the second move fails the
/// previous index is put back, so a failed write never leaves a new index
/// beside an old chunk file.
pub fn write_assets(
    paths: &AssetPaths,
    index: &FlatIndex,
    store: &ChunkStore,
) -> Result<(), BuildError> {
    let index_dir = output_dir(&paths.index)?;
    let chunks_dir = output_dir(&paths.chunks)?;

    let staged_index = staging_file(&index_dir)?;
    index.save(staged_index.path())?;
    let staged_chunks = staging_file(&chunks_dir)?;
    store.save(staged_chunks.path())?;

    let previous = set_aside(&paths.index, &index_dir)?;
    if let Err(err) = persist(staged_index, &paths.index) {
        restore_index(previous, &paths.index);
        return Err(err);
    }
    if let Err(err) = persist(staged_chunks, &paths.chunks) {
        restore_index(previous, &paths.index);
        return Err(err);
    }
    Ok(())
}

fn output_dir(path: &Path) -> Result<PathBuf, BuildError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|source| BuildError::OutputDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

fn staging_file(dir: &Path) -> Result<NamedTempFile, BuildError> {
    tempfile::Builder::new()
        .prefix(".docrag-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|source| BuildError::OutputDir {
            path: dir.to_path_buf(),
            source,
        })
}

fn persist(staged: NamedTempFile, target: &Path) -> Result<(), BuildError> {
    staged
        .persist(target)
        .map(|_| ())
        .map_err(|err| BuildError::Persist {
            path: target.to_path_buf(),
            source: err.error,
        })
}

/// Moves an existing index out of the way; the returned path is deleted on
/// drop unless it is restored.
fn set_aside(target: &Path, dir: &Path) -> Result<Option<TempPath>, BuildError> {
    if !target.is_file() {
        return Ok(None);
    }
    let backup = staging_file(dir)?.into_temp_path();
    fs::rename(target, &backup).map_err(|source| BuildError::Persist {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(Some(backup))
}

fn restore_index(previous: Option<TempPath>, target: &Path) {
    let restored = match previous {
        Some(backup) => backup.persist(target).map_err(|err| err.error),
        None => match fs::remove_file(target) {
            Err(err) if err.kind() != ErrorKind::NotFound && target.is_file() => Err(err),
            _ => Ok(()),
        },
    };
    if let Err(err) = restored {
        warn!(
            path = %target.display(),
            error = %err,
            "failed to roll back the index after a partial write"
        );
    }
}
