//! Persisted chunk records, looked up by the ids stored in the vector index.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;

use crate::chunker::Chunk;
use crate::error::StoreError;

/// Ordered chunk records with an id lookup table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    positions: HashMap<usize, usize>,
}

impl ChunkStore {
    /// Builds a store from chunks in their canonical order.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self, StoreError> {
        let mut positions = HashMap::with_capacity(chunks.len());
        for (position, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.id, position).is_some() {
                return Err(StoreError::DuplicateId(chunk.id));
            }
        }
        Ok(Self { chunks, positions })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Looks up a chunk by id.
    pub fn get(&self, id: usize) -> Option<&Chunk> {
        self.positions.get(&id).map(|&position| &self.chunks[position])
    }

    /// Records in canonical order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// CRC32 over every record's id, page and text, in order.
    ///
    /// Stored in the index at build time so a chunk file from a different build
    /// is caught at load time even when the counts happen to match.
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = Crc32::new();
        for chunk in &self.chunks {
            hasher.update(&(chunk.id as u64).to_le_bytes());
            hasher.update(&chunk.page_number.to_le_bytes());
            hasher.update(&(chunk.text.len() as u64).to_le_bytes());
            hasher.update(chunk.text.as_bytes());
        }
        hasher.finalize()
    }

    /// Writes one JSON record per line.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        for chunk in &self.chunks {
            serde_json::to_writer(&mut writer, chunk)?;
            writer
                .write_all(b"\n")
                .map_err(|source| StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads records written by [`ChunkStore::save`], skipping blank lines.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut chunks = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|source| StoreError::Record {
                path: path.to_path_buf(),
                line: line_no + 1,
                source,
            })?;
            chunks.push(chunk);
        }
        Self::new(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(id: usize, page_number: i64, text: &str) -> Chunk {
        Chunk {
            id,
            page_number,
            text: text.to_string(),
        }
    }

    #[test]
    fn jsonl_round_trip() {
        let store = ChunkStore::new(vec![
            chunk(0, -3, "Cover page."),
            chunk(1, 4, "Attendance must be 75%. Quotes \"stay\" intact."),
        ])
        .expect("store");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        store.save(&path).expect("save");

        let reloaded = ChunkStore::load(&path).expect("load");
        assert_eq!(reloaded, store);
        assert_eq!(reloaded.fingerprint(), store.fingerprint());
        assert_eq!(reloaded.get(1).map(|c| c.page_number), Some(4));
    }

    #[test]
    fn fingerprint_tracks_text_and_order() {
        let a = ChunkStore::new(vec![chunk(0, 1, "one"), chunk(1, 1, "two")]).expect("a");
        let b = ChunkStore::new(vec![chunk(0, 1, "one"), chunk(1, 1, "tw0")]).expect("b");
        let c = ChunkStore::new(vec![chunk(1, 1, "two"), chunk(0, 1, "one")]).expect("c");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = ChunkStore::new(vec![chunk(0, 1, "a"), chunk(0, 2, "b")]).expect_err("dup");
        assert!(matches!(err, StoreError::DuplicateId(0)));
    }

    #[test]
    fn reports_bad_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(&path, "{\"id\":0,\"page_number\":1,\"text\":\"ok\"}\n\nnot json\n")
            .expect("write");
        match ChunkStore::load(&path).expect_err("bad line") {
            StoreError::Record { line, .. } => assert_eq!(line, 3),
            other => panic!("expected record error, got {other:?}"),
        }
    }
}
