//! Read path: document name + question → most relevant passages.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cache::VectorIndexCache;
use crate::embedder::Embedder;
use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{Passage, VectorIndex};
use crate::loader::{DocumentFormat, TextSplitter, load_chunks};

/// Separator placed between passages in [`render_passages`].
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

/// Directory of documents the assistant may read.  Names are resolved
/// inside it; anything escaping it is rejected.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    root: PathBuf,
}

impl KnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a document name such as `report.md` to its path.
    pub fn resolve(&self, name: &str) -> RetrievalResult<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.trim().is_empty() || escapes {
            return Err(RetrievalError::OutsideKnowledgeBase {
                name: name.to_string(),
            });
        }

        let root = fs::canonicalize(&self.root).map_err(|err| RetrievalError::from_io(&self.root, err))?;
        let candidate = root.join(relative);
        let resolved =
            fs::canonicalize(&candidate).map_err(|err| RetrievalError::from_io(&candidate, err))?;
        // Symlinks may still point elsewhere.
        if !resolved.starts_with(&root) {
            return Err(RetrievalError::OutsideKnowledgeBase {
                name: name.to_string(),
            });
        }
        Ok(resolved)
    }

    /// Sorted names of the loadable files directly inside the knowledge base.
    /// A missing directory is an empty knowledge base.
    pub fn list_documents(&self) -> RetrievalResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RetrievalError::from_io(&self.root, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| RetrievalError::from_io(&self.root, err))?;
            let path = entry.path();
            if path.is_file() && DocumentFormat::from_path(&path).is_ok() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Answers questions against single documents through a
/// [`VectorIndexCache`].
#[derive(Clone)]
pub struct RetrievalQuery {
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
}

impl RetrievalQuery {
    pub fn new(embedder: Arc<dyn Embedder>, splitter: TextSplitter) -> Self {
        Self { embedder, splitter }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Build an index for `document` directly, bypassing every cache tier.
    pub async fn build_index(&self, document: &Path) -> RetrievalResult<VectorIndex> {
        let chunks = load_chunks(document, &self.splitter)?;
        VectorIndex::build(chunks, self.embedder.as_ref()).await
    }

    /// Up to `k` passages of `document` most relevant to `query_text`.
    /// A `k` of zero is treated as one, so a non-empty document always
    /// yields at least one passage.
    pub async fn query(
        &self,
        cache: &mut VectorIndexCache,
        document: &Path,
        query_text: &str,
        k: usize,
    ) -> RetrievalResult<Vec<Passage>> {
        if !document.exists() {
            return Err(RetrievalError::NotFound {
                path: document.to_path_buf(),
            });
        }
        DocumentFormat::from_path(document)?;

        let embedder_id = self.embedder.id();
        let index = cache
            .get_or_build(document, &embedder_id, || self.build_index(document))
            .await?;

        let k = k.max(1);
        let query_vector = self.embedder.embed(query_text).await?;
        let passages = index.nearest(&query_vector, k);
        debug!(
            document = %document.display(),
            k,
            returned = passages.len(),
            "retrieval query answered"
        );
        Ok(passages)
    }
}

/// Passage texts joined with [`PASSAGE_SEPARATOR`].
pub fn render_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use tempfile::TempDir;

    fn retrieval() -> RetrievalQuery {
        RetrievalQuery::new(Arc::new(HashingEmbedder::new(64)), TextSplitter::new(60, 10))
    }

    #[test]
    fn resolve_rejects_traversal_and_absolute_names() {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::new(dir.path());
        for name in ["../secret.txt", "/etc/passwd", "a/../../b.md", ""] {
            let err = kb.resolve(name).unwrap_err();
            assert!(
                matches!(err, RetrievalError::OutsideKnowledgeBase { .. }),
                "{name}: {err:?}"
            );
        }
    }

    #[test]
    fn resolve_finds_existing_documents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.md"), "# Report").unwrap();
        let kb = KnowledgeBase::new(dir.path());
        let path = kb.resolve("report.md").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("report.md"));
        assert!(matches!(
            kb.resolve("missing.md"),
            Err(RetrievalError::NotFound { .. })
        ));
    }

    #[test]
    fn list_documents_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        for name in ["b.md", "a.txt", "c.csv", "image.png", "notes.docx"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.md")).unwrap();
        let kb = KnowledgeBase::new(dir.path());
        assert_eq!(kb.list_documents().unwrap(), vec!["a.txt", "b.md", "c.csv"]);
        assert!(KnowledgeBase::new(dir.path().join("none")).list_documents().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected_before_building() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("deck.pptx");
        fs::write(&doc, "slides").unwrap();
        let mut cache = VectorIndexCache::new(dir.path().join("cache"));

        let err = retrieval().query(&mut cache, &doc, "q", 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::UnsupportedFormat { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut cache = VectorIndexCache::new(dir.path().join("cache"));
        let err = retrieval()
            .query(&mut cache, &dir.path().join("nope.md"), "q", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn returns_at_most_k_passages() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("market.txt");
        let text = (0..20)
            .map(|i| format!("paragraph {i} covers sector {}", i % 4))
            .collect::<Vec<_>>()
            .join("\n\n");
        fs::write(&doc, &text).unwrap();
        let mut cache = VectorIndexCache::new(dir.path().join("cache"));

        let passages = retrieval().query(&mut cache, &doc, "sector 2", 3).await.unwrap();
        assert_eq!(passages.len(), 3);
        for passage in &passages {
            assert!(text.contains(&passage.text));
        }
    }

    #[tokio::test]
    async fn zero_k_still_returns_the_best_passage() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("lines.txt");
        fs::write(&doc, "one\n\ntwo\n\nthree").unwrap();
        let mut cache = VectorIndexCache::new(dir.path().join("cache"));

        let passages = retrieval().query(&mut cache, &doc, "one", 0).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert!(passages[0].text.contains("one"));
    }

    #[test]
    fn pdf_documents_are_listed_next_to_text_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.md"), "# Notes").unwrap();
        crate::test_support::write_pdf(&dir.path().join("report.pdf"), &["Quarterly revenue"]);
        let kb = KnowledgeBase::new(dir.path());
        assert_eq!(kb.list_documents().unwrap(), vec!["notes.md", "report.pdf"]);
    }

    #[tokio::test]
    async fn pdf_documents_are_queryable() {
        let dir = TempDir::new().unwrap();
        crate::test_support::write_pdf(
            &dir.path().join("report.pdf"),
            &["Cloud revenue grew strongly", "Regulatory risk in Europe"],
        );
        let kb = KnowledgeBase::new(dir.path());
        let doc = kb.resolve("report.pdf").unwrap();
        let mut cache = VectorIndexCache::new(dir.path().join("cache"));

        let passages = retrieval().query(&mut cache, &doc, "regulatory risk", 3).await.unwrap();
        let rendered = render_passages(&passages);
        assert!(rendered.contains("Regulatory risk in Europe"), "{rendered:?}");
    }

    #[test]
    fn render_joins_with_separator() {
        let passages = vec![
            Passage { text: "one".into(), score: 0.9, chunk: 0 },
            Passage { text: "two".into(), score: 0.5, chunk: 3 },
        ];
        assert_eq!(render_passages(&passages), "one\n---\ntwo");
        assert_eq!(render_passages(&[]), "");
    }
}
