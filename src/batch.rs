//! Batch generation over many controls.
//!
//! Controls run concurrently up to `[generation] concurrency`, bounded by a
//! tokio [`Semaphore`] and driven through a [`JoinSet`]. Inside one control
//! retrieval and the generation state machine run sequentially. Results are
//! reassembled in input order, then the whole batch goes through the
//! identifier uniqueness check.
//!
//! Cancellation is cooperative: a control that has not started when the
//! token is cancelled is reported as skipped. Controls already in flight
//! finish normally.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use control_mapper_core::model::GenerativeModel;
use control_mapper_core::models::{ControlMappingRecord, ControlRequirement};
use control_mapper_core::uniqueness::{check_unique_ids, DuplicateIdError};

use crate::generate::{generate_control, Disposition, GenerationOutcome, GenerationSettings};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retrieve::Retriever;

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Everything a control task needs, shared across tasks.
pub struct BatchContext {
    pub retriever: Retriever,
    pub model: Arc<dyn GenerativeModel>,
    pub settings: GenerationSettings,
    pub top_k: usize,
    pub concurrency: usize,
    pub security_overview: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Attempts exhausted; a fallback record was emitted.
    Fallback,
    /// Retrieval or a non-retryable model error; no record.
    Error,
    /// The batch contains a repeated identifier.
    DuplicateId,
}

/// One entry of `validation_failures.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ControlFailure {
    pub control_id: String,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One record per generated control, in input order.
    pub records: Vec<ControlMappingRecord>,
    pub accepted: usize,
    pub failures: Vec<ControlFailure>,
    /// Ids of controls never started because the batch was cancelled.
    pub skipped: Vec<String>,
    pub duplicate: Option<DuplicateIdError>,
}

impl BatchReport {
    /// No errors and no duplicate ids. Fallbacks do not count as failure.
    pub fn is_success(&self) -> bool {
        self.duplicate.is_none() && !self.failures.iter().any(|f| f.kind == FailureKind::Error)
    }
}

enum ControlResult {
    Done(Box<GenerationOutcome>),
    Failed(String),
    Skipped,
}

async fn process_control(ctx: &BatchContext, control: &ControlRequirement) -> Result<GenerationOutcome> {
    let evidence = ctx
        .retriever
        .retrieve(&control.query_text(), ctx.top_k, Some(&control.id))
        .await?;
    generate_control(
        ctx.model.as_ref(),
        control,
        &evidence,
        ctx.security_overview.as_deref(),
        &ctx.settings,
    )
    .await
}

/// Generate a record for every control.
pub async fn run_batch(
    controls: Vec<ControlRequirement>,
    ctx: Arc<BatchContext>,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> BatchReport {
    let total = controls.len();
    let ids: Vec<String> = controls.iter().map(|c| c.id.clone()).collect();
    let semaphore = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
    let mut set = JoinSet::new();

    for (i, control) in controls.into_iter().enumerate() {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (i, ControlResult::Skipped);
            };
            if cancel.is_cancelled() {
                return (i, ControlResult::Skipped);
            }
            let result = match process_control(&ctx, &control).await {
                Ok(outcome) => ControlResult::Done(Box::new(outcome)),
                Err(e) => ControlResult::Failed(format!("{:#}", e)),
            };
            (i, result)
        });
    }

    let mut slots: Vec<Option<ControlResult>> = (0..total).map(|_| None).collect();
    let mut finished = 0u64;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, result)) => {
                finished += 1;
                let disposition = match &result {
                    ControlResult::Done(o) => o.disposition.as_str(),
                    ControlResult::Failed(_) => "error",
                    ControlResult::Skipped => "skipped",
                };
                progress.report(ProgressEvent::Generated {
                    control_id: ids[i].clone(),
                    disposition: disposition.to_string(),
                    n: finished,
                    total: total as u64,
                });
                slots[i] = Some(result);
            }
            Err(e) => error!(error = %e, "generation task failed to complete"),
        }
    }

    let mut report = BatchReport::default();
    for (id, slot) in ids.into_iter().zip(slots) {
        match slot {
            Some(ControlResult::Done(outcome)) => {
                let outcome = *outcome;
                match outcome.disposition {
                    Disposition::Accepted => report.accepted += 1,
                    Disposition::Fallback => report.failures.push(ControlFailure {
                        control_id: id,
                        kind: FailureKind::Fallback,
                        violations: outcome.violations,
                        last_raw_response: outcome.last_raw_response,
                        error: None,
                    }),
                }
                report.records.push(outcome.record);
            }
            Some(ControlResult::Skipped) => report.skipped.push(id),
            Some(ControlResult::Failed(message)) => {
                warn!(control = %id, error = %message, "control failed");
                report.failures.push(ControlFailure {
                    control_id: id,
                    kind: FailureKind::Error,
                    violations: Vec::new(),
                    last_raw_response: None,
                    error: Some(message),
                });
            }
            None => report.failures.push(ControlFailure {
                control_id: id,
                kind: FailureKind::Error,
                violations: Vec::new(),
                last_raw_response: None,
                error: Some("generation task aborted".to_string()),
            }),
        }
    }

    if let Err(dup) = check_unique_ids(&report.records) {
        error!(error = %dup, "duplicate identifier in batch");
        report.failures.push(ControlFailure {
            control_id: dup.control_id.clone(),
            kind: FailureKind::DuplicateId,
            violations: vec![dup.to_string()],
            last_raw_response: None,
            error: None,
        });
        report.duplicate = Some(dup);
    }

    info!(
        records = report.records.len(),
        accepted = report.accepted,
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        "batch complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::retrieve::LoadedCorpus;
    use async_trait::async_trait;
    use control_mapper_core::embedding::Embedder;
    use control_mapper_core::model::ModelError;
    use control_mapper_core::models::{EvidenceUnit, UnitKind};
    use control_mapper_core::segment::segment;
    use control_mapper_core::store::IndexedCollection;
    use control_mapper_core::validate::STATUS_NOT_APPLICABLE;
    use std::time::Duration;

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        fn model_name(&self) -> &str {
            "flat"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Accepts everything except controls whose prompt mentions "broken".
    struct ByControl;

    #[async_trait]
    impl GenerativeModel for ByControl {
        fn model_name(&self) -> &str {
            "by-control"
        }
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            if prompt.contains("broken") {
                return Err(ModelError::Failed("upstream error".to_string()));
            }
            if prompt.contains("vague") {
                return Ok("{}".to_string());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(serde_json::json!({
                "control-status": STATUS_NOT_APPLICABLE,
                "control-explanation": "The system stores no data subject to this control."
            })
            .to_string())
        }
    }

    fn control(id: &str, statement: &str) -> ControlRequirement {
        ControlRequirement {
            id: id.to_string(),
            title: id.to_string(),
            statement: statement.to_string(),
            parameters: Vec::new(),
        }
    }

    fn context(concurrency: usize) -> Arc<BatchContext> {
        let units: Vec<(EvidenceUnit, Vec<f32>)> = segment("app.py", "def main(): pass\n", UnitKind::Code)
            .into_iter()
            .map(|u| (u, vec![1.0]))
            .collect();
        let corpus = LoadedCorpus {
            units: IndexedCollection::build(units).unwrap(),
            summaries: None,
        };
        Arc::new(BatchContext {
            retriever: Retriever::new(Arc::new(corpus), Arc::new(FlatEmbedder)),
            model: Arc::new(ByControl),
            settings: GenerationSettings {
                rate_limit_backoff: Duration::from_millis(0),
                ..GenerationSettings::default()
            },
            top_k: 3,
            concurrency,
            security_overview: None,
        })
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_reports() {
        let controls = vec![
            control("AC-1", "Policy."),
            control("AC-2", "vague requirement"),
            control("AC-3", "broken requirement"),
            control("AC-4", "Enforcement."),
        ];
        let report = run_batch(controls, context(3), &CancellationToken::new(), &NoProgress).await;

        let ids: Vec<&str> = report.records.iter().map(|r| r.control_id.as_str()).collect();
        assert_eq!(ids, vec!["AC-1", "AC-2", "AC-4"]);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].control_id, "AC-2");
        assert_eq!(report.failures[0].kind, FailureKind::Fallback);
        assert_eq!(report.failures[1].control_id, "AC-3");
        assert_eq!(report.failures[1].kind, FailureKind::Error);
        assert!(report.duplicate.is_none());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let controls = vec![control("AC-1", "a"), control("AC-2", "b")];
        let report = run_batch(controls, context(1), &cancel, &NoProgress).await;
        assert!(report.records.is_empty());
        assert_eq!(report.skipped, vec!["AC-1", "AC-2"]);
        assert!(report.is_success());
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
