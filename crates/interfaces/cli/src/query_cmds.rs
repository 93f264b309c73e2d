use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use ragdesk_config::AppConfig;
use ragdesk_retrieval::{
    Embedder, HashingEmbedder, KnowledgeBase, OllamaEmbedder, RetrievalQuery, TextSplitter,
    VectorIndexCache, render_passages,
};

pub(crate) fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    let retrieval = &config.retrieval;
    let embedder: Arc<dyn Embedder> = match retrieval.embedder.to_ascii_lowercase().as_str() {
        "hashing" => Arc::new(HashingEmbedder::new(retrieval.hashing_dimension)),
        "ollama" => Arc::new(OllamaEmbedder::new(
            &retrieval.ollama_base_url,
            &retrieval.ollama_model,
        )),
        other => bail!("unknown embedder '{other}' (expected 'hashing' or 'ollama')"),
    };
    info!(embedder = %embedder.id(), "embedding backend configured");
    Ok(embedder)
}

pub(crate) fn run_docs(config: &AppConfig) -> Result<()> {
    let kb = KnowledgeBase::new(config.knowledge_base_dir());
    let names = kb.list_documents()?;
    if names.is_empty() {
        println!(
            "knowledge base {} has no supported documents",
            kb.root().display()
        );
        return Ok(());
    }
    println!("documents in {}:", kb.root().display());
    for name in names {
        println!("  {name}");
    }
    Ok(())
}

pub(crate) async fn run_query(
    config: &AppConfig,
    document: &str,
    text: &str,
    k: Option<usize>,
) -> Result<()> {
    let kb = KnowledgeBase::new(config.knowledge_base_dir());
    let path = kb.resolve(document)?;

    let retrieval = RetrievalQuery::new(
        build_embedder(config)?,
        TextSplitter::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap),
    );
    let mut cache = VectorIndexCache::new(config.cache_dir()).with_lock_timeout(
        std::time::Duration::from_millis(config.memory.lock_timeout_ms),
    );

    let passages = retrieval
        .query(&mut cache, &path, text, k.unwrap_or(config.retrieval.top_k))
        .await?;
    println!("{}", render_passages(&passages));
    Ok(())
}
