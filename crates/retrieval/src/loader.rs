//! Document loading and chunking.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};

/// Extensions the built-in loader can read, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt", "csv", "pdf"];

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Markdown,
    Text,
    Csv,
    Pdf,
}

impl DocumentFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> RetrievalResult<Self> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "txt" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            _ => Err(RetrievalError::UnsupportedFormat {
                extension: if extension.is_empty() {
                    "<none>".to_string()
                } else {
                    format!(".{extension}")
                },
                supported: SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|ext| format!(".{ext}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

/// Read the text of `path`.  Text formats are read as UTF-8; PDFs go through
/// [`extract_pdf_text`].
pub fn load_text(path: &Path) -> RetrievalResult<String> {
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Markdown | DocumentFormat::Text | DocumentFormat::Csv => {
            fs::read_to_string(path).map_err(|err| RetrievalError::from_io(path, err))
        }
        DocumentFormat::Pdf => extract_pdf_text(path),
    }
}

/// Concatenate the text of every page, in page order, separated by blank
/// lines.  Pages without extractable text are skipped.
pub fn extract_pdf_text(path: &Path) -> RetrievalResult<String> {
    let bytes = fs::read(path).map_err(|err| RetrievalError::from_io(path, err))?;
    let doc = lopdf::Document::load_mem(&bytes).map_err(|err| RetrievalError::Extraction {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().into_keys() {
        match doc.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text.trim().to_string()),
            Ok(_) => {}
            Err(err) => {
                debug!(path = %path.display(), page = page_number, %err, "pdf page has no extractable text");
            }
        }
    }
    Ok(pages.join("\n\n"))
}

/// Load `path` and split it into non-blank chunks.
///
/// Fails with [`RetrievalError::EmptyContent`] when nothing but whitespace
/// remains after splitting.
pub fn load_chunks(path: &Path, splitter: &TextSplitter) -> RetrievalResult<Vec<String>> {
    let text = load_text(path)?;
    let chunks = splitter.split(&text);
    if chunks.is_empty() {
        return Err(RetrievalError::EmptyContent {
            path: path.to_path_buf(),
        });
    }
    Ok(chunks)
}

/// Recursive character splitter.
///
/// Text is split on the first separator of `["\n\n", "\n", " ", ""]` that
/// occurs in it; pieces longer than `chunk_size` are split again with the
/// remaining separators, and neighbouring pieces are merged back into chunks
/// of at most `chunk_size` characters that share up to `chunk_overlap`
/// characters.  Every chunk is a verbatim substring of the input.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextSplitter {
    /// `chunk_size` is at least 1 and `chunk_overlap` is kept below it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            // Empty pieces are kept so that joining neighbours with the
            // separator reproduces the source text exactly.
            text.split(separator).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |window: &VecDeque<&str>| {
                if window.is_empty() { 0 } else { separator_len }
            };
            if !window.is_empty() && total + len + joined_len(&window) > self.chunk_size {
                if let Some(chunk) = join_trimmed(&window, separator) {
                    chunks.push(chunk);
                }
                // Slide forward, keeping at most `chunk_overlap` characters.
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joined_len(&window) > self.chunk_size)
                {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    let sep = if window.is_empty() { 0 } else { separator_len };
                    total = total.saturating_sub(char_len(first) + sep);
                }
            }
            total += len + joined_len(&window);
            window.push_back(piece);
        }
        if let Some(chunk) = join_trimmed(&window, separator) {
            chunks.push(chunk);
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_trimmed(window: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}
