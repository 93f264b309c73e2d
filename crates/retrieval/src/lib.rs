//! Document retrieval over a two-tier (memory + disk) cache of vector
//! indexes derived from knowledge-base files.
//!
//! ```text
//! RetrievalQuery ──► VectorIndexCache ──► L1 memory ─► L2 disk ─► rebuild
//!                          │
//!                          └── ContentFingerprint (recomputed per lookup)
//! ```

pub mod cache;
pub mod embedder;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod loader;
pub mod query;

#[cfg(test)]
mod test_support;

pub use cache::{CacheTier, IndexMetadata, VectorIndexCache};
pub use embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use error::{RetrievalError, RetrievalResult};
pub use fingerprint::ContentFingerprint;
pub use index::{Passage, VectorIndex};
pub use loader::{DocumentFormat, TextSplitter, extract_pdf_text, load_text};
pub use query::{KnowledgeBase, PASSAGE_SEPARATOR, RetrievalQuery, render_passages};
