//! Error types for the retrieval path.

use std::path::{Path, PathBuf};

use ragdesk_memory::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The source document does not exist.
    #[error("document not found: {}", path.display())]
    NotFound { path: PathBuf },
    /// The document extension has no loader.
    #[error("unsupported document format '{extension}' (supported: {supported})")]
    UnsupportedFormat {
        extension: String,
        supported: String,
    },
    /// Chunking left no non-blank text to index.
    #[error("document {} is empty or has no extractable text", path.display())]
    EmptyContent { path: PathBuf },
    /// A document name resolved to a path outside the knowledge base.
    #[error("document {name} resolves outside the knowledge base")]
    OutsideKnowledgeBase { name: String },
    /// A binary document (PDF) could not be parsed.
    #[error("failed to extract text from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },
    /// The embedding backend failed or returned unusable vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RetrievalError {
    /// Map an I/O error on `path`, turning `NotFound` into
    /// [`RetrievalError::NotFound`].
    pub fn from_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;
