//! Query-time lookup: embed the question, search the index, resolve chunk ids.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::chunker::Chunk;
use crate::embedder::Embedder;
use crate::error::RetrievalError;
use crate::index::FlatIndex;
use crate::store::ChunkStore;

/// A chunk returned for a query, with its distance to the query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Squared Euclidean distance; smaller is more relevant.
    pub distance: f32,
    /// The matching chunk.
    pub chunk: Chunk,
}

/// Read-only retrieval over a loaded index and chunk store.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: FlatIndex,
    store: ChunkStore,
}

impl Retriever {
    /// Pairs an index with its chunk store after checking they belong together.
    ///
    /// An empty index with an empty store is accepted; queries against it fail
    /// with [`RetrievalError::EmptyIndex`].
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: FlatIndex,
        store: ChunkStore,
    ) -> Result<Self, RetrievalError> {
        check_alignment(&index, &store)?;
        Ok(Self {
            embedder,
            index,
            store,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns up to `k` chunks closest to `query`, most relevant first.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.ensure_ready(k)?;
        let vector = self.embedder.embed_query(query)?;
        self.retrieve_by_vector(&vector, k)
    }

    /// Same as [`Retriever::retrieve`] for an already embedded query.
    pub fn retrieve_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.ensure_ready(k)?;
        let neighbors = self.index.search(vector, k)?;
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let chunk = self.store.get(neighbor.id).ok_or_else(|| {
                RetrievalError::Misaligned(format!("index id {} has no chunk record", neighbor.id))
            })?;
            results.push(RetrievedChunk {
                distance: neighbor.distance,
                chunk: chunk.clone(),
            });
        }
        debug!(
            k,
            hits = results.len(),
            best = results.first().map(|hit| hit.distance),
            "retrieved chunks"
        );
        Ok(results)
    }

    fn ensure_ready(&self, k: usize) -> Result<(), RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }
        if self.index.is_empty() || self.store.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        Ok(())
    }
}

/// Verifies that every index entry has a chunk record and that both sides come
/// from the same build.
pub fn check_alignment(index: &FlatIndex, store: &ChunkStore) -> Result<(), RetrievalError> {
    if index.len() != store.len() {
        return Err(RetrievalError::Misaligned(format!(
            "index holds {} vectors but chunk store holds {} records",
            index.len(),
            store.len()
        )));
    }
    if let Some(expected) = index.chunk_fingerprint() {
        let actual = store.fingerprint();
        if expected != actual {
            return Err(RetrievalError::Misaligned(format!(
                "chunk fingerprint {actual:08x} does not match index fingerprint {expected:08x}"
            )));
        }
    }
    if let Some(id) = index.ids().find(|&id| store.get(id).is_none()) {
        return Err(RetrievalError::Misaligned(format!(
            "index id {id} has no chunk record"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbedError;

    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(inputs
                .iter()
                .map(|text| vec![text.len() as f32, 0.0])
                .collect())
        }
    }

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id,
            page_number: 1,
            text: text.to_string(),
        }
    }

    fn retriever() -> Retriever {
        let store = ChunkStore::new(vec![chunk(0, "a"), chunk(1, "bbb"), chunk(2, "cccccc")])
            .expect("store");
        let mut index = FlatIndex::new();
        index
            .add(vec![vec![1.0, 0.0], vec![3.0, 0.0], vec![6.0, 0.0]])
            .expect("index");
        index.set_chunk_fingerprint(store.fingerprint());
        Retriever::new(Arc::new(AxisEmbedder), index, store).expect("retriever")
    }

    #[test]
    fn maps_neighbors_back_to_chunks() {
        let hits = retriever().retrieve("xxxx", 2).expect("retrieve");
        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["bbb", "cccccc"]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn zero_k_is_rejected() {
        assert!(matches!(
            retriever().retrieve("x", 0),
            Err(RetrievalError::InvalidTopK)
        ));
    }

    #[test]
    fn count_mismatch_is_misaligned() {
        let store = ChunkStore::new(vec![chunk(0, "a")]).expect("store");
        let mut index = FlatIndex::new();
        index.add(vec![vec![1.0], vec![2.0]]).expect("index");
        assert!(matches!(
            Retriever::new(Arc::new(AxisEmbedder), index, store),
            Err(RetrievalError::Misaligned(_))
        ));
    }

    #[test]
    fn fingerprint_mismatch_is_misaligned() {
        let store = ChunkStore::new(vec![chunk(0, "a")]).expect("store");
        let mut index = FlatIndex::new();
        index.add(vec![vec![1.0]]).expect("index");
        index.set_chunk_fingerprint(store.fingerprint() ^ 1);
        assert!(matches!(
            check_alignment(&index, &store),
            Err(RetrievalError::Misaligned(_))
        ));
    }

    #[test]
    fn unknown_ids_are_misaligned() {
        let store = ChunkStore::new(vec![chunk(5, "a")]).expect("store");
        let mut index = FlatIndex::new();
        index.add(vec![vec![1.0]]).expect("index");
        assert!(matches!(
            check_alignment(&index, &store),
            Err(RetrievalError::Misaligned(_))
        ));
    }
}
