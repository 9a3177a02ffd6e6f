//! Generation output documents.
//!
//! `implemented_requirements.json` is always written:
//!
//! ```json
//! {
//!   "implemented_requirements": [ ... ],
//!   "_metadata": {
//!     "generation_info": {
//!       "model": "gpt-4o-mini",
//!       "provider": "openai",
//!       "base_url": "https://api.openai.com/v1",
//!       "command": "cmap generate controls.json",
//!       "started_at": "2026-01-01T00:00:00Z",
//!       "version": "0.3.0"
//!     }
//!   }
//! }
//! ```
//!
//! `validation_failures.json` is written only when the batch produced a
//! fallback, an error or a duplicate id; a stale one is removed otherwise.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use control_mapper_core::models::ControlMappingRecord;

use crate::batch::{BatchReport, ControlFailure};
use crate::config::LlmConfig;
use crate::persist::{self, FAILURES_FILE, REQUIREMENTS_FILE};

#[derive(Debug, Clone, Serialize)]
pub struct GenerationInfo {
    pub model: String,
    pub provider: String,
    pub base_url: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl GenerationInfo {
    pub fn new(llm: &LlmConfig, model_name: &str, command: String, started_at: DateTime<Utc>) -> Self {
        Self {
            model: model_name.to_string(),
            provider: llm.provider.clone(),
            base_url: llm.resolved_base_url(),
            command,
            started_at,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    generation_info: &'a GenerationInfo,
}

#[derive(Serialize)]
struct RequirementsDocument<'a> {
    implemented_requirements: &'a [ControlMappingRecord],
    #[serde(rename = "_metadata")]
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct FailuresDocument<'a> {
    generation_info: &'a GenerationInfo,
    failures: &'a [ControlFailure],
}

/// Write the batch results into `dir`.
pub fn write_outputs(dir: &Path, report: &BatchReport, info: &GenerationInfo) -> Result<()> {
    let document = RequirementsDocument {
        implemented_requirements: &report.records,
        metadata: Metadata {
            generation_info: info,
        },
    };
    persist::write_json(&dir.join(REQUIREMENTS_FILE), &document)?;

    let failures_path = dir.join(FAILURES_FILE);
    if report.failures.is_empty() {
        if failures_path.exists() {
            std::fs::remove_file(&failures_path)
                .with_context(|| format!("Failed to remove {}", failures_path.display()))?;
        }
    } else {
        persist::write_json(
            &failures_path,
            &FailuresDocument {
                generation_info: info,
                failures: &report.failures,
            },
        )?;
    }
    Ok(())
}
