//! Text embedding clients.

pub mod openai;

use tracing::info;

use crate::error::EmbedError;

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be deterministic for identical input so that query
/// vectors land in the same space as the indexed chunk vectors.
pub trait Embedder: Send + Sync {
    /// Maximum number of inputs accepted by one `embed_batch` call.
    fn batch_size(&self) -> usize;

    /// Output dimension, when known up front.
    fn dimensions(&self) -> Option<usize> {
        None
    }

    /// Embeds a batch of inputs, returning one vector per input in order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embeds a single query string.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[query])?;
        if vectors.len() != 1 {
            return Err(EmbedError::Count {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}

/// Embeds every input, splitting into batches of the embedder's batch size.
pub fn embed_all(embedder: &dyn Embedder, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
    let batch_size = embedder.batch_size().max(1);
    let mut vectors = Vec::with_capacity(inputs.len());
    for batch in inputs.chunks(batch_size) {
        let embedded = embedder.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(EmbedError::Count {
                expected: batch.len(),
                actual: embedded.len(),
            });
        }
        vectors.extend(embedded);
        info!(embedded = vectors.len(), total = inputs.len(), "embedding progress");
    }
    Ok(vectors)
}
