//! Locations and loading of the persisted index and chunk files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::embedder::Embedder;
use crate::error::LoadError;
use crate::index::FlatIndex;
use crate::retriever::Retriever;
use crate::store::ChunkStore;

/// File name of the vector index inside an asset directory.
pub const INDEX_FILE_NAME: &str = "index.bin";

/// File name of the chunk records inside an asset directory.
pub const CHUNKS_FILE_NAME: &str = "chunks.jsonl";

/// Where the two serving assets live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    /// Binary vector index.
    pub index: PathBuf,
    /// JSONL chunk records.
    pub chunks: PathBuf,
}

impl AssetPaths {
    /// Standard file names under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            index: dir.join(INDEX_FILE_NAME),
            chunks: dir.join(CHUNKS_FILE_NAME),
        }
    }
}

/// Reads both asset files.
pub fn load_assets(paths: &AssetPaths) -> Result<(FlatIndex, ChunkStore), LoadError> {
    for path in [&paths.index, &paths.chunks] {
        if !path.is_file() {
            return Err(LoadError::MissingAsset { path: path.clone() });
        }
    }
    let index = FlatIndex::load(&paths.index)?;
    let store = ChunkStore::load(&paths.chunks)?;
    info!(
        vectors = index.len(),
        chunks = store.len(),
        dimension = index.dimension(),
        index = %paths.index.display(),
        "loaded serving assets"
    );
    Ok((index, store))
}

/// Loads the assets and checks they belong together.
pub fn load_retriever(
    paths: &AssetPaths,
    embedder: Arc<dyn Embedder>,
) -> Result<Retriever, LoadError> {
    let (index, store) = load_assets(paths)?;
    Ok(Retriever::new(embedder, index, store)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout() {
        let paths = AssetPaths::in_dir("assets");
        assert_eq!(paths.index, PathBuf::from("assets/index.bin"));
        assert_eq!(paths.chunks, PathBuf::from("assets/chunks.jsonl"));
    }

    #[test]
    fn missing_files_are_reported_by_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AssetPaths::in_dir(dir.path());
        match load_assets(&paths) {
            Err(LoadError::MissingAsset { path }) => assert_eq!(path, paths.index),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn corrupt_index_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AssetPaths::in_dir(dir.path());
        std::fs::write(&paths.index, b"not an index").expect("write");
        std::fs::write(&paths.chunks, b"").expect("write");
        assert!(matches!(load_assets(&paths), Err(LoadError::Index(_))));
    }
}
