//! Exact nearest-neighbour index over chunk embeddings.
//!
//! Search is brute force over every stored vector using squared Euclidean
//! distance, so results are exact and ordered by ascending distance with ties
//! broken by id.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

const INDEX_MAGIC: [u8; 8] = *b"DOCRAGIX";
const INDEX_VERSION: u32 = 1;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Squared Euclidean distance to the query.
    pub distance: f32,
    /// Id of the stored vector (and of its chunk).
    pub id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    id: usize,
    vector: Vec<f32>,
}

/// Append-only flat index keyed by explicit ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
    ids: HashSet<usize>,
    chunk_fingerprint: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    magic: [u8; 8],
    version: u32,
    dimension: Option<usize>,
    chunk_fingerprint: Option<u32>,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    /// Creates an empty index; the dimension is fixed by the first insertion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    /// Fingerprint of the chunk texts this index was built from, if recorded.
    pub fn chunk_fingerprint(&self) -> Option<u32> {
        self.chunk_fingerprint
    }

    /// Records the fingerprint of the chunk store built alongside this index.
    pub fn set_chunk_fingerprint(&mut self, fingerprint: u32) {
        self.chunk_fingerprint = Some(fingerprint);
    }

    /// Appends vectors, assigning ids that continue from the current length.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        let start = self.entries.len();
        self.add_with_ids(
            vectors
                .into_iter()
                .enumerate()
                .map(|(offset, vector)| (start + offset, vector)),
        )
    }

    /// Appends `(id, vector)` pairs in iteration order.
    ///
    /// The batch is validated before anything is inserted, so a failed call
    /// leaves the index unchanged.
    pub fn add_with_ids<I>(&mut self, items: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = (usize, Vec<f32>)>,
    {
        let items: Vec<(usize, Vec<f32>)> = items.into_iter().collect();
        let mut dimension = self.dimension;
        let mut batch_ids = HashSet::with_capacity(items.len());
        for (id, vector) in &items {
            check_dimension(&mut dimension, vector.len())?;
            if self.ids.contains(id) || !batch_ids.insert(*id) {
                return Err(IndexError::DuplicateId(*id));
            }
        }
        self.dimension = dimension;
        for (id, vector) in items {
            self.ids.insert(id);
            self.entries.push(IndexEntry { id, vector });
        }
        Ok(())
    }

    /// Returns the `k` nearest stored vectors, closest first.
    ///
    /// Fewer than `k` hits are returned when the index holds fewer vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(IndexError::Dimension {
                    expected,
                    actual: query.len(),
                });
            }
        }
        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|entry| Neighbor {
                distance: euclidean_distance_squared(&entry.vector, query),
                id: entry.id,
            })
            .collect();
        if k < scored.len() {
            scored.select_nth_unstable_by(k, compare_neighbors);
            scored.truncate(k);
        }
        scored.sort_by(compare_neighbors);
        Ok(scored)
    }

    /// Writes the index to `path` in its binary format.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let persisted = PersistedIndex {
            magic: INDEX_MAGIC,
            version: INDEX_VERSION,
            dimension: self.dimension,
            chunk_fingerprint: self.chunk_fingerprint,
            entries: self.entries.clone(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, &persisted)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads an index previously written by [`FlatIndex::save`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let reader = BufReader::new(File::open(path)?);
        let persisted: PersistedIndex = bincode::deserialize_from(reader)?;
        if persisted.magic != INDEX_MAGIC {
            return Err(IndexError::Format("bad magic bytes".to_string()));
        }
        if persisted.version != INDEX_VERSION {
            return Err(IndexError::Format(format!(
                "unsupported version {} (expected {})",
                persisted.version, INDEX_VERSION
            )));
        }
        let mut index = Self {
            dimension: persisted.dimension,
            chunk_fingerprint: persisted.chunk_fingerprint,
            ..Self::default()
        };
        index.add_with_ids(
            persisted
                .entries
                .into_iter()
                .map(|entry| (entry.id, entry.vector)),
        )?;
        Ok(index)
    }
}

fn check_dimension(dimension: &mut Option<usize>, actual: usize) -> Result<(), IndexError> {
    if actual == 0 {
        return Err(IndexError::ZeroDimension);
    }
    match *dimension {
        Some(expected) if expected != actual => Err(IndexError::Dimension { expected, actual }),
        Some(_) => Ok(()),
        None => {
            *dimension = Some(actual);
            Ok(())
        }
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
