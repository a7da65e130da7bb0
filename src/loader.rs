//! Page-level text extraction for source documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::LoadError;

/// Offset applied to zero-based page indices so numbering matches the printed
/// page numbers of the handbook the assets were first built from (three pages
/// of front matter).
pub const DEFAULT_PAGE_OFFSET: i64 = -3;

const PAGE_BREAK: char = '\x0C';

/// Upper bound on a source document download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Loader tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Added to each zero-based page index to produce `Page::page_number`.
    pub page_offset: i64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_offset: DEFAULT_PAGE_OFFSET,
        }
    }
}

/// Normalized text of one source page plus cheap size statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Offset-adjusted page number; negative for front matter.
    pub page_number: i64,
    /// Page text with newlines collapsed to spaces and outer whitespace trimmed.
    pub text: String,
    /// Character count of `text`.
    pub char_count: usize,
    /// Number of pieces when splitting `text` on single spaces.
    pub word_count: usize,
    /// Number of pieces when splitting `text` on `". "`.
    pub raw_sentence_count: usize,
    /// Rough token estimate (four characters per token).
    pub approx_token_count: f64,
}

impl Page {
    /// Builds a page record from raw extracted text.
    pub fn new(page_number: i64, raw: &str) -> Self {
        let text = normalize_page_text(raw);
        let char_count = text.chars().count();
        Self {
            page_number,
            word_count: text.split(' ').count(),
            raw_sentence_count: text.split(". ").count(),
            approx_token_count: char_count as f64 / 4.0,
            char_count,
            text,
        }
    }
}

/// Collapses line breaks into spaces and trims the result.
pub fn normalize_page_text(raw: &str) -> String {
    raw.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Reads a source document into one [`Page`] per page, in document order.
///
/// PDFs are split by the extractor's page boundaries. Plain-text and Markdown
/// files treat form feed characters as page breaks, so a file without any is a
/// single page.
pub fn load_document(path: &Path, config: &LoaderConfig) -> Result<Vec<Page>, LoadError> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| LoadError::Unsupported {
        path: path.to_path_buf(),
    })?;
    let raw_pages = match kind {
        DocumentKind::Pdf => read_pdf_pages(path)?,
        DocumentKind::Text => read_text_pages(path)?,
    };
    let pages = pages_from_raw(raw_pages, config);
    info!(
        path = %path.display(),
        pages = pages.len(),
        "loaded source document"
    );
    Ok(pages)
}

/// Converts already-extracted page strings into numbered, normalized pages.
pub fn pages_from_raw<I, S>(raw_pages: I, config: &LoaderConfig) -> Vec<Page>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_pages
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| Page::new(idx as i64 + config.page_offset, raw.as_ref()))
        .collect()
}

fn read_pdf_pages(path: &Path) -> Result<Vec<String>, LoadError> {
    let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|err| {
        LoadError::Pdf {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    debug!(pages = pages.len(), "pdf text extracted");
    Ok(pages)
}

fn read_text_pages(path: &Path) -> Result<Vec<String>, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

fn io_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: PathBuf::from(path),
        source,
    }
}

/// Downloads `url` to `dest`, returning the number of bytes written.
///
/// The body is staged next to `dest` and renamed into place, so a failed
/// download never leaves a partial document behind. The blocking client runs
/// on its own thread and the call blocks until it finishes.
pub fn fetch_document(url: &str, dest: &Path) -> Result<u64, LoadError> {
    let owned_url = url.to_string();
    let owned_dest = dest.to_path_buf();
    thread::spawn(move || download(&owned_url, &owned_dest))
        .join()
        .unwrap_or_else(|_| {
            Err(LoadError::Download {
                url: url.to_string(),
                message: "download thread panicked".to_string(),
            })
        })
}

fn download(url: &str, dest: &Path) -> Result<u64, LoadError> {
    let failed = |message: String| LoadError::Download {
        url: url.to_string(),
        message,
    };
    let client = Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|err| failed(err.to_string()))?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .map_err(|err| failed(err.to_string()))?;

    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_error = |source: std::io::Error| LoadError::Io {
        path: dest.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_error)?;
    let mut staged = NamedTempFile::new_in(dir).map_err(io_error)?;
    let bytes = response
        .copy_to(staged.as_file_mut())
        .map_err(|err| failed(err.to_string()))?;
    staged.persist(dest).map_err(|err| io_error(err.error))?;
    info!(url, path = %dest.display(), bytes, "downloaded source document");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalizes_newlines_and_counts() {
        let page = Page::new(0, "  Attendance must be 75%.\nLate work loses marks. \n");
        assert_eq!(page.text, "Attendance must be 75%. Late work loses marks.");
        assert_eq!(page.char_count, page.text.len());
        assert_eq!(page.word_count, 8);
        assert_eq!(page.raw_sentence_count, 2);
        assert!((page.approx_token_count - page.char_count as f64 / 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn applies_configured_page_offset() {
        let pages = pages_from_raw(["cover", "toc", "intro", "body"], &LoaderConfig::default());
        let numbers: Vec<i64> = pages.iter().map(|page| page.page_number).collect();
        assert_eq!(numbers, vec![-3, -2, -1, 0]);

        let pages = pages_from_raw(["a", "b"], &LoaderConfig { page_offset: 1 });
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 2);
    }

    #[test]
    fn splits_text_files_on_form_feed() {
        let mut file = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .expect("tempfile");
        write!(file, "First page.\nStill first.\x0CSecond page.").expect("write");

        let pages = load_document(file.path(), &LoaderConfig { page_offset: 0 }).expect("load");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].text, "First page. Still first.");
        assert_eq!(pages[1].text, "Second page.");
        assert_eq!(pages[1].page_number, 1);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load_document(Path::new("/nonexistent/handbook.pdf"), &LoaderConfig::default())
            .expect_err("missing file");
        assert!(matches!(err, LoadError::Io { .. }), "got {err:?}");
    }

    #[test]
    fn rejects_unknown_extensions() {
        let err = load_document(Path::new("notes.docx"), &LoaderConfig::default())
            .expect_err("unsupported");
        assert!(matches!(err, LoadError::Unsupported { .. }), "got {err:?}");
    }
}
