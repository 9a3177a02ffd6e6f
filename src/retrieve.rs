//! Query-time retrieval over a persisted index.
//!
//! Loads the unit collection (required) and the summary collection (when
//! `cmap index` built one), embeds the query once, and delegates ranking
//! and deduplication to [`control_mapper_core::retrieve`].

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use control_mapper_core::embedding::{embed_query, Embedder};
use control_mapper_core::models::{EvidenceUnit, FileSummary, RetrievedEvidence};
use control_mapper_core::retrieve::{retrieve_with_vector, Corpus};
use control_mapper_core::store::IndexedCollection;

use crate::persist::{self, SUMMARIES, UNITS};

/// Both collections of one index build, loaded into memory.
pub struct LoadedCorpus {
    pub units: IndexedCollection<EvidenceUnit>,
    pub summaries: Option<IndexedCollection<FileSummary>>,
}

impl LoadedCorpus {
    pub fn load(dir: &Path) -> Result<Self> {
        let units = persist::load_collection(dir, UNITS)
            .with_context(|| format!("No usable index in {}. Run `cmap index` first.", dir.display()))?;
        let summaries = persist::load_optional_collection(dir, SUMMARIES)?;
        Ok(Self { units, summaries })
    }

    pub fn corpus(&self) -> Corpus<'_> {
        Corpus {
            units: &self.units,
            summaries: self.summaries.as_ref(),
        }
    }
}

/// Embeds queries and searches a shared [`LoadedCorpus`].
#[derive(Clone)]
pub struct Retriever {
    corpus: Arc<LoadedCorpus>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(corpus: Arc<LoadedCorpus>, embedder: Arc<dyn Embedder>) -> Self {
        Self { corpus, embedder }
    }

    /// Top-`k` units plus top-`k` summaries for `query_text`, merged and
    /// deduplicated. `id_namespace` adds hint-tagged units for that control.
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        id_namespace: Option<&str>,
    ) -> Result<Vec<RetrievedEvidence>> {
        let query = embed_query(self.embedder.as_ref(), query_text).await?;
        let evidence = retrieve_with_vector(self.corpus.corpus(), &query, k, id_namespace)
            .with_context(|| {
                format!(
                    "Search failed; was the index built with embedding model '{}'?",
                    self.embedder.model_name()
                )
            })?;
        debug!(k, hits = evidence.len(), control = ?id_namespace, "retrieved evidence");
        Ok(evidence)
    }
}
