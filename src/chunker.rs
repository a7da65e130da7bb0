//! Sentence-bounded chunking of page text.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::loader::Page;

/// Sentences grouped into one chunk unless configured otherwise.
pub const DEFAULT_SENTENCES_PER_CHUNK: usize = 5;

/// Retrieval unit: consecutive sentences from a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ordinal position in the chunk sequence; shared with the vector index entry.
    pub id: usize,
    /// Page the sentences came from.
    pub page_number: i64,
    /// Sentences joined with single spaces.
    pub text: String,
}

/// Splits text on Unicode sentence boundaries, trimming each sentence and
/// dropping the empty ones.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split_sentence_bounds()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Groups each page's sentences into chunks of `sentences_per_chunk`.
///
/// Chunks never cross a page boundary, so the last chunk of a page may be
/// shorter. Ids are assigned in output order starting at zero. A size of zero
/// is treated as one.
pub fn chunk_pages(pages: &[Page], sentences_per_chunk: usize) -> Vec<Chunk> {
    let size = sentences_per_chunk.max(1);
    let mut chunks = Vec::new();
    for page in pages {
        let sentences = split_sentences(&page.text);
        for batch in sentences.chunks(size) {
            chunks.push(Chunk {
                id: chunks.len(),
                page_number: page.page_number,
                text: batch.join(" "),
            });
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{pages_from_raw, LoaderConfig};
    use pretty_assertions::assert_eq;

    fn numbered_sentences(count: usize) -> String {
        (1..=count)
            .map(|n| format!("Rule number {n} applies here."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn splits_on_sentence_boundaries() {
        let sentences =
            split_sentences("Attendance must be 75%. Late submissions lose 10% per day.");
        assert_eq!(
            sentences,
            vec!["Attendance must be 75%.", "Late submissions lose 10% per day."]
        );
    }

    #[test]
    fn batches_sentences_with_short_tail() {
        let pages = pages_from_raw([numbered_sentences(12)], &LoaderConfig::default());
        let chunks = chunk_pages(&pages, 5);
        let sizes: Vec<usize> = chunks
            .iter()
            .map(|chunk| split_sentences(&chunk.text).len())
            .collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(
            chunks.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn chunks_reproduce_sentence_sequence() {
        let text = format!("{} Short one! Is this a question? Yes.", numbered_sentences(7));
        let pages = pages_from_raw([text.as_str()], &LoaderConfig::default());
        let expected = split_sentences(&pages[0].text).join(" ");
        for size in 1..=12 {
            let chunks = chunk_pages(&pages, size);
            let rejoined = chunks
                .iter()
                .map(|chunk| chunk.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            assert_eq!(rejoined, expected, "chunk size {size}");
        }
    }

    #[test]
    fn never_mixes_pages() {
        let pages = pages_from_raw(
            [
                "Alpha one. Alpha two. Alpha three.",
                "",
                "Beta one. Beta two.",
            ],
            &LoaderConfig { page_offset: 10 },
        );
        let chunks = chunk_pages(&pages, 2);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            let page = pages
                .iter()
                .find(|page| page.page_number == chunk.page_number)
                .expect("source page");
            for sentence in split_sentences(&chunk.text) {
                assert!(page.text.contains(sentence), "{sentence} not on its page");
            }
        }
        assert_eq!(chunks[2].page_number, 12);
        assert_eq!(chunks[2].text, "Beta one. Beta two.");
    }

    #[test]
    fn zero_size_behaves_like_one() {
        let pages = pages_from_raw(["One. Two."], &LoaderConfig::default());
        assert_eq!(chunk_pages(&pages, 0), chunk_pages(&pages, 1));
    }
}
