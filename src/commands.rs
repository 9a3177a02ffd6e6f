//! Command implementations behind the `cmap` subcommands.
//!
//! Each `run_*` function takes the loaded [`Config`], does its work, prints
//! a short report on stdout and returns. Progress and logs go to stderr.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use control_mapper_core::models::{ControlMappingRecord, ControlRequirement, Granularity};
use control_mapper_core::template::{
    ANNOTATION_SOURCE_CODE, PROP_CONFIGURATION, PROP_DESCRIPTION, PROP_EXPLANATION, PROP_NAME,
    PROP_STATUS,
};
use control_mapper_core::uniqueness::check_unique_ids;
use control_mapper_core::validate::STATUS_VALUES;

use crate::batch::{run_batch, BatchContext, CancellationToken};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::generate::GenerationSettings;
use crate::indexer::build_index;
use crate::llm::create_model;
use crate::output::{write_outputs, GenerationInfo};
use crate::persist::{self, REQUIREMENTS_FILE};
use crate::progress::ProgressReporter;
use crate::retrieve::{LoadedCorpus, Retriever};

fn require_embeddings(config: &Config, command: &str) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!(
            "`cmap {}` requires embeddings. Set [embedding] provider in config.",
            command
        );
    }
    Ok(())
}

/// `cmap index`
pub async fn run_index(config: &Config, progress: &dyn ProgressReporter) -> Result<()> {
    require_embeddings(config, "index")?;
    let embedder = create_provider(&config.embedding)?;
    let summarizer = if config.summaries.enabled {
        Some(create_model(&config.llm)?)
    } else {
        None
    };

    let stats = build_index(config, embedder.as_ref(), summarizer.as_deref(), progress).await?;

    println!("index {}", config.scan.root.display());
    println!("  files indexed: {}", stats.files);
    println!("  files skipped: {}", stats.skipped);
    println!("  evidence units: {}", stats.units);
    println!("  file summaries: {}", stats.summaries);
    println!("  config files: {}", stats.config_files);
    println!("  output: {}", config.index.output_dir.display());
    println!("ok");
    Ok(())
}

/// `cmap search`
pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    control: Option<&str>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    require_embeddings(config, "search")?;

    let corpus = Arc::new(LoadedCorpus::load(&config.index.output_dir)?);
    let retriever = Retriever::new(corpus, create_provider(&config.embedding)?);
    let k = k.unwrap_or(config.retrieval.top_k).max(1);
    let results = retriever.retrieve(query, k, control).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in results.iter().enumerate() {
        let location = match (item.start_line, item.end_line) {
            (Some(s), Some(e)) => format!("{}:{}-{}", item.source_identifier, s, e),
            _ => item.source_identifier.clone(),
        };
        let label = match item.granularity {
            Granularity::Unit => item.kind.as_str(),
            Granularity::Summary => "summary",
        };
        let distance = item
            .distance
            .map(|d| format!("{:.4}", d))
            .unwrap_or_else(|| "hint".to_string());
        println!("{}. [{}] {}  ({})", i + 1, label, location, distance);
        let preview = item.content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        println!("   {}", preview.trim());
    }
    Ok(())
}

/// Parse a controls file: a JSON array of control requirements.
pub fn load_controls(path: &Path) -> Result<Vec<ControlRequirement>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read controls file: {}", path.display()))?;
    let controls: Vec<ControlRequirement> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse controls file: {}", path.display()))?;
    Ok(controls)
}

/// `cmap generate`. Returns `false` when the batch must fail the process.
pub async fn run_generate(
    config: &Config,
    controls_path: &Path,
    command: String,
    progress: &dyn ProgressReporter,
) -> Result<bool> {
    require_embeddings(config, "generate")?;
    if !config.llm.is_enabled() {
        bail!("`cmap generate` requires a model. Set [llm] provider in config.");
    }

    let started_at = Utc::now();
    let controls = load_controls(controls_path)?;
    if controls.is_empty() {
        println!("No controls in {}.", controls_path.display());
        return Ok(true);
    }

    let out_dir = &config.index.output_dir;
    let corpus = Arc::new(LoadedCorpus::load(out_dir)?);
    let retriever = Retriever::new(corpus, create_provider(&config.embedding)?);
    let model = create_model(&config.llm)?;
    let security_overview = persist::read_security_overview(out_dir)?;
    if security_overview.is_some() {
        info!("using security overview");
    }

    let generation_info = GenerationInfo::new(&config.llm, model.model_name(), command, started_at);
    let ctx = Arc::new(BatchContext {
        retriever,
        model,
        settings: GenerationSettings::from(&config.generation),
        top_k: config.retrieval.top_k,
        concurrency: config.generation.concurrency,
        security_overview,
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing controls in flight");
            on_signal.cancel();
        }
    });

    let report = run_batch(controls, ctx, &cancel, progress).await;
    signal_task.abort();

    write_outputs(out_dir, &report, &generation_info)?;

    println!("generate {}", controls_path.display());
    println!("  records: {}", report.records.len());
    println!("  accepted: {}", report.accepted);
    println!("  failures: {}", report.failures.len());
    if !report.skipped.is_empty() {
        println!("  skipped: {}", report.skipped.len());
    }
    if let Some(dup) = &report.duplicate {
        eprintln!("Error: {}", dup);
    }
    println!("  output: {}", out_dir.join(REQUIREMENTS_FILE).display());

    let ok = report.is_success();
    println!("{}", if ok { "ok" } else { "failed" });
    Ok(ok)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordsFile {
    Document {
        implemented_requirements: Vec<ControlMappingRecord>,
    },
    Bare(Vec<ControlMappingRecord>),
}

/// Structural problems in a set of records.
pub fn check_records(records: &[ControlMappingRecord]) -> Vec<String> {
    let mut problems = Vec::new();
    for record in records {
        for name in [
            PROP_STATUS,
            PROP_NAME,
            PROP_DESCRIPTION,
            PROP_EXPLANATION,
            PROP_CONFIGURATION,
        ] {
            if record.property(name).is_none() {
                problems.push(format!("{}: missing property {}", record.control_id, name));
            }
        }
        if let Some(status) = record.text_property(PROP_STATUS) {
            if !STATUS_VALUES.contains(&status) {
                problems.push(format!(
                    "{}: invalid control-status '{}'",
                    record.control_id, status
                ));
            }
        }
        if record.annotation(ANNOTATION_SOURCE_CODE).is_none() {
            problems.push(format!(
                "{}: missing annotation {}",
                record.control_id, ANNOTATION_SOURCE_CODE
            ));
        }
        if record.statements.is_empty() {
            problems.push(format!("{}: no statements", record.control_id));
        }
    }
    if let Err(dup) = check_unique_ids(records) {
        problems.push(dup.to_string());
    }
    problems
}

/// `cmap check`. Returns `false` when problems were found.
pub fn run_check(config: &Config, path: Option<&Path>) -> Result<bool> {
    let default_path = config.index.output_dir.join(REQUIREMENTS_FILE);
    let path = path.unwrap_or(default_path.as_path());
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = match serde_json::from_str::<RecordsFile>(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?
    {
        RecordsFile::Document {
            implemented_requirements,
        } => implemented_requirements,
        RecordsFile::Bare(records) => records,
    };

    let problems = check_records(&records);
    println!("check {}", path.display());
    println!("  records: {}", records.len());
    for problem in &problems {
        println!("  problem: {}", problem);
    }
    let ok = problems.is_empty();
    println!("{}", if ok { "ok" } else { "failed" });
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_mapper_core::template::create_template;
    use tempfile::TempDir;

    #[test]
    fn test_check_records() {
        let good = vec![
            create_template("AC-1", "a", "b", "m-1", "s-1"),
            create_template("AC-2", "a", "b", "m-2", "s-2"),
        ];
        assert!(check_records(&good).is_empty());

        let mut bad = good.clone();
        bad[1].statements[0].uuid = "m-1".to_string();
        bad[0].properties.retain(|p| p.name != PROP_EXPLANATION);
        let problems = check_records(&bad);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("control-explanation"));
        assert!(problems[1].contains("duplicate statement id 'm-1'"));
    }

    #[test]
    fn test_run_check_accepts_document_and_bare_list() {
        let tmp = TempDir::new().unwrap();
        let records = vec![create_template("AC-1", "a", "b", "m-1", "s-1")];
        let mut config = Config::default();
        config.index.output_dir = tmp.path().to_path_buf();

        let doc = serde_json::json!({"implemented_requirements": records, "_metadata": {}});
        persist::write_json(&tmp.path().join(REQUIREMENTS_FILE), &doc).unwrap();
        assert!(run_check(&config, None).unwrap());

        let bare = tmp.path().join("bare.json");
        persist::write_json(&bare, &records).unwrap();
        assert!(run_check(&config, Some(&bare)).unwrap());
    }

    #[test]
    fn test_load_controls() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("controls.json");
        std::fs::write(
            &path,
            r#"[{"id": "ac-2", "title": "Account Management", "statement": "Manage {{ insert: param, ac-2_prm_1 }}.",
                "parameters": [{"id": "ac-2_prm_1", "resolved_text": "accounts"}]}]"#,
        )
        .unwrap();
        let controls = load_controls(&path).unwrap();
        assert_eq!(controls[0].query_text(), "Manage accounts.");
    }

    #[tokio::test]
    async fn test_generate_requires_model() {
        let mut config = Config::default();
        config.embedding.provider = "local".to_string();
        let err = run_generate(
            &config,
            Path::new("controls.json"),
            "cmap generate".to_string(),
            &crate::progress::NoProgress,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("[llm]"));
    }
}
