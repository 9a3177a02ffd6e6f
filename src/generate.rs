//! Generation orchestrator: one control in, one valid record out.
//!
//! # State machine
//!
//! ```text
//! BuildPrompt ─▶ Generate ─▶ Parse ─▶ Validate ─▶ Accept
//!                   ▲          │          │
//!                   │          ▼          ▼
//!                   └──── RetryWithFeedback ─▶ Fallback   (attempts exhausted)
//! ```
//!
//! Each pass through `Generate` spends one attempt. A rate-limited model
//! call is retried with backoff inside the same attempt. `Accept` and
//! `Fallback` both return a structurally complete record: a fallback keeps
//! the template's conservative status and merges only the well-typed fields
//! of the last parsed answer.
//!
//! Any model failure other than a rate limit is an error.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use control_mapper_core::model::{GenerativeModel, ModelError};
use control_mapper_core::models::{ControlMappingRecord, ControlRequirement, RetrievedEvidence};
use control_mapper_core::prompt::{
    build_control_prompt, parse_model_response, with_feedback, PromptInput,
};
use control_mapper_core::template::{apply_partial, apply_validated, new_template, set_evidence};
use control_mapper_core::validate::validate;

use crate::config::GenerationConfig;

/// Retry policy and prompt sizing.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_attempts: u32,
    pub evidence_char_budget: usize,
    pub rate_limit_backoff: Duration,
    pub max_rate_limit_retries: u32,
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            evidence_char_budget: config.evidence_char_budget,
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            max_rate_limit_retries: config.max_rate_limit_retries,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Accepted,
    Fallback,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Accepted => "accepted",
            Disposition::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub record: ControlMappingRecord,
    pub disposition: Disposition,
    /// Content attempts spent (rate-limit retries excluded).
    pub attempts: u32,
    /// Every call made to the model, including rate-limited ones.
    pub model_calls: u32,
    /// Violations of the last rejected answer. Empty when accepted first time.
    pub violations: Vec<String>,
    pub last_raw_response: Option<String>,
}

enum GenerationState {
    BuildPrompt,
    Generate { prompt: String },
    Parse { raw: String },
    Validate { content: Value },
    Accept { content: Value },
    RetryWithFeedback { violations: Vec<String> },
    Fallback,
}

/// Distinct non-empty source paths, in the order they were given.
pub fn evidence_paths(evidence: &[RetrievedEvidence]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for item in evidence {
        let path = &item.source_identifier;
        if !path.is_empty() && !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    paths
}

/// Produce a record for `control` from already-retrieved `evidence`.
pub async fn generate_control(
    model: &dyn GenerativeModel,
    control: &ControlRequirement,
    evidence: &[RetrievedEvidence],
    security_overview: Option<&str>,
    settings: &GenerationSettings,
) -> Result<GenerationOutcome> {
    let mut record = new_template(&control.id, &control.title, control.query_text().trim());
    set_evidence(&mut record, evidence_paths(evidence));

    let mut base_prompt = String::new();
    let mut attempts = 0u32;
    let mut model_calls = 0u32;
    let mut violations: Vec<String> = Vec::new();
    let mut last_content: Option<Value> = None;
    let mut last_raw: Option<String> = None;

    let mut state = GenerationState::BuildPrompt;
    loop {
        state = match state {
            GenerationState::BuildPrompt => {
                base_prompt = build_control_prompt(&PromptInput {
                    control,
                    evidence,
                    security_overview,
                    evidence_char_budget: settings.evidence_char_budget,
                });
                GenerationState::Generate {
                    prompt: base_prompt.clone(),
                }
            }
            GenerationState::Generate { prompt } => {
                attempts += 1;
                debug!(control = %control.id, attempt = attempts, "calling model");
                let raw = complete_with_backoff(model, &prompt, settings, &mut model_calls)
                    .await
                    .with_context(|| format!("Generation failed for control {}", control.id))?;
                GenerationState::Parse { raw }
            }
            GenerationState::Parse { raw } => {
                let parsed = parse_model_response(&raw);
                last_raw = Some(raw);
                match parsed {
                    Ok(content) => GenerationState::Validate { content },
                    Err(e) => {
                        // Fallback merges only the final answer.
                        last_content = None;
                        GenerationState::RetryWithFeedback {
                            violations: vec![e.to_string()],
                        }
                    }
                }
            }
            GenerationState::Validate { content } => {
                let outcome = validate(&content);
                if outcome.is_valid {
                    GenerationState::Accept { content }
                } else {
                    last_content = Some(content);
                    GenerationState::RetryWithFeedback {
                        violations: outcome.violations,
                    }
                }
            }
            GenerationState::RetryWithFeedback {
                violations: latest,
            } => {
                debug!(
                    control = %control.id,
                    attempt = attempts,
                    violations = ?latest,
                    "answer rejected"
                );
                violations = latest;
                if attempts >= settings.max_attempts {
                    GenerationState::Fallback
                } else {
                    GenerationState::Generate {
                        prompt: with_feedback(&base_prompt, &violations),
                    }
                }
            }
            GenerationState::Accept { content } => {
                apply_validated(&mut record, &content);
                info!(control = %control.id, attempts, model_calls, "control accepted");
                return Ok(GenerationOutcome {
                    record,
                    disposition: Disposition::Accepted,
                    attempts,
                    model_calls,
                    violations,
                    last_raw_response: last_raw,
                });
            }
            GenerationState::Fallback => {
                if let Some(content) = &last_content {
                    apply_partial(&mut record, content);
                }
                warn!(
                    control = %control.id,
                    attempts,
                    violations = ?violations,
                    "attempts exhausted; using fallback record"
                );
                return Ok(GenerationOutcome {
                    record,
                    disposition: Disposition::Fallback,
                    attempts,
                    model_calls,
                    violations,
                    last_raw_response: last_raw,
                });
            }
        };
    }
}

/// Server-provided `Retry-After` wins; otherwise a fixed backoff.
fn rate_limit_wait(retry_after: Option<Duration>, settings: &GenerationSettings) -> Duration {
    retry_after.unwrap_or(settings.rate_limit_backoff)
}

/// One content attempt: retry rate-limited calls after a backoff.
async fn complete_with_backoff(
    model: &dyn GenerativeModel,
    prompt: &str,
    settings: &GenerationSettings,
    model_calls: &mut u32,
) -> Result<String> {
    let mut rate_limited = 0u32;
    loop {
        *model_calls += 1;
        match model.complete(prompt).await {
            Ok(raw) => return Ok(raw),
            Err(ModelError::RateLimited { retry_after })
                if rate_limited < settings.max_rate_limit_retries =>
            {
                rate_limited += 1;
                let wait = rate_limit_wait(retry_after, settings);
                warn!(
                    model = model.model_name(),
                    retry = rate_limited,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
