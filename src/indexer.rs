//! Index build pipeline (`cmap index`).
//!
//! ```text
//! scan ─▶ segment (rayon) ─▶ embed (batched) ─▶ units.index + units.meta.json
//!   │
//!   ├──▶ config inventory ─▶ config_files.json
//!   │
//!   └──▶ summarize (optional) ─▶ embed ─▶ summaries.index + summaries.meta.json
//! ```
//!
//! A build always replaces the previous one. Nothing is written until every
//! stage has succeeded, and stale summary files are removed before the new
//! units land, so retrieval never mixes two generations of the repository.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use control_mapper_core::embedding::Embedder;
use control_mapper_core::hints::HintTable;
use control_mapper_core::model::GenerativeModel;
use control_mapper_core::models::{EvidenceUnit, FileSummary, UnitKind};
use control_mapper_core::prompt::build_file_summary_prompt;
use control_mapper_core::segment::segment_with_hints;
use control_mapper_core::store::IndexedCollection;

use crate::config::Config;
use crate::inventory::{inventory_entry, ConfigFileEntry};
use crate::persist::{self, CONFIG_FILES_FILE, SUMMARIES, UNITS};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scan::{scan_repository, ScannedFile};

/// Counts reported at the end of `cmap index`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub files: usize,
    pub skipped: usize,
    pub units: usize,
    pub summaries: usize,
    pub config_files: usize,
}

/// Load the hint table named by `[scan] hints_file`.
pub fn load_hints(path: Option<&Path>) -> Result<Option<HintTable>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hints file: {}", path.display()))?;
    let table = HintTable::from_toml_str(&text)
        .with_context(|| format!("Failed to parse hints file: {}", path.display()))?;
    info!(controls = table.len(), path = %path.display(), "loaded hint table");
    Ok(Some(table))
}

/// Segment every file in parallel. Output keeps file order.
pub fn segment_files(files: &[ScannedFile], hints: Option<&HintTable>) -> Vec<EvidenceUnit> {
    files
        .par_iter()
        .map(|f| segment_with_hints(&f.relative_path, &f.content, f.kind, hints))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Embed `texts` in chunks of `batch_size`, preserving order.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    progress: Option<&dyn ProgressReporter>,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed(batch).await?;
        if embedded.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} inputs",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
        if let Some(p) = progress {
            p.report(ProgressEvent::Embedding {
                n: vectors.len() as u64,
                total: texts.len() as u64,
            });
        }
    }
    Ok(vectors)
}

/// Text sent to the embedder for a unit. Blank units embed their path.
fn embedding_text(unit: &EvidenceUnit) -> String {
    if unit.content.trim().is_empty() {
        unit.source_identifier.clone()
    } else {
        unit.content.clone()
    }
}

/// Summarize each non-config file. Failures are logged and skipped.
pub async fn summarize_files(
    model: &dyn GenerativeModel,
    files: &[ScannedFile],
    max_chars: usize,
    progress: &dyn ProgressReporter,
) -> Vec<(String, String)> {
    let targets: Vec<&ScannedFile> = files
        .iter()
        .filter(|f| f.kind != UnitKind::Config && !f.content.trim().is_empty())
        .collect();

    let mut summaries = Vec::new();
    for (i, file) in targets.iter().enumerate() {
        let prompt = build_file_summary_prompt(&file.relative_path, &file.content, max_chars);
        match model.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                summaries.push((file.relative_path.clone(), text.trim().to_string()));
            }
            Ok(_) => warn!(path = %file.relative_path, "model returned an empty summary"),
            Err(e) => warn!(path = %file.relative_path, error = %e, "summary failed"),
        }
        progress.report(ProgressEvent::Summarizing {
            n: (i + 1) as u64,
            total: targets.len() as u64,
        });
    }
    summaries
}

/// Run the full pipeline and write every index artifact to `output_dir`.
pub async fn build_index(
    config: &Config,
    embedder: &dyn Embedder,
    summarizer: Option<&dyn GenerativeModel>,
    progress: &dyn ProgressReporter,
) -> Result<IndexStats> {
    let out_dir = &config.index.output_dir;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output dir: {}", out_dir.display()))?;

    let scan = scan_repository(&config.scan)?;
    progress.report(ProgressEvent::Scanned {
        files: scan.files.len() as u64,
        skipped: scan.skipped as u64,
    });
    info!(
        files = scan.files.len(),
        skipped = scan.skipped,
        root = %config.scan.root.display(),
        "scan complete"
    );

    let hints = load_hints(config.scan.hints_file.as_deref())?;
    let units = segment_files(&scan.files, hints.as_ref());
    if units.is_empty() {
        bail!(
            "No evidence found under {}; nothing to index",
            config.scan.root.display()
        );
    }

    let texts: Vec<String> = units.iter().map(embedding_text).collect();
    let vectors =
        embed_in_batches(embedder, &texts, config.embedding.batch_size, Some(progress)).await?;
    let unit_count = units.len();
    let unit_collection = IndexedCollection::build(units.into_iter().zip(vectors).collect())
        .context("Failed to build unit index")?;

    let inventory: Vec<ConfigFileEntry> = scan
        .files
        .iter()
        .filter(|f| f.kind == UnitKind::Config)
        .map(inventory_entry)
        .collect();

    let mut summary_collection = None;
    if let Some(model) = summarizer.filter(|_| config.summaries.enabled) {
        let summaries =
            summarize_files(model, &scan.files, config.summaries.max_file_chars, progress).await;
        if summaries.is_empty() {
            warn!("no file summaries produced; summary index skipped");
        } else {
            let texts: Vec<String> = summaries.iter().map(|(_, s)| s.clone()).collect();
            let vectors =
                embed_in_batches(embedder, &texts, config.embedding.batch_size, None).await?;
            let entries: Vec<(FileSummary, Vec<f32>)> = summaries
                .into_iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, ((path, text), vector))| {
                    let summary = FileSummary {
                        source_identifier: path,
                        summary_text: text,
                        vector_position: i,
                    };
                    (summary, vector)
                })
                .collect();
            summary_collection =
                Some(IndexedCollection::build(entries).context("Failed to build summary index")?);
        }
    }

    // Nothing has been written to `out_dir` before this point.
    persist::remove_collection(out_dir, SUMMARIES)?;
    persist::save_collection(out_dir, UNITS, &unit_collection)?;
    info!(units = unit_count, model = embedder.model_name(), "unit index written");
    persist::write_json(&out_dir.join(CONFIG_FILES_FILE), &inventory)?;

    let summary_count = summary_collection.as_ref().map_or(0, |c| c.len());
    if let Some(collection) = &summary_collection {
        persist::save_collection(out_dir, SUMMARIES, collection)?;
        info!(summaries = summary_count, "summary index written");
    }

    Ok(IndexStats {
        files: scan.files.len(),
        skipped: scan.skipped,
        units: unit_count,
        summaries: summary_count,
        config_files: inventory.len(),
    })
}
