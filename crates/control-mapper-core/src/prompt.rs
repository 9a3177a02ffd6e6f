//! Prompt assembly and model response parsing.
//!
//! Prompts are plain text. The control prompt asks the model for a small
//! JSON object holding only the fields generation merges into a template:
//!
//! ```json
//! {
//!   "control-status": "applicable and inherently satisfied",
//!   "control-explanation": "...",
//!   "control-configuration": [{"file_path": "...", "key_path": "...", "line_number": 1}],
//!   "statement-description": "..."
//! }
//! ```
//!
//! Identifiers (uuids, statement ids) never pass through the model.

use serde_json::Value;

use crate::models::{ControlRequirement, Granularity, RetrievedEvidence};
use crate::validate::{CONFIG_EXTENSIONS, STATUS_VALUES};

const CONTROL_SYSTEM: &str =
    "You are a security compliance expert mapping a software repository to a compliance control.";

const SUMMARY_SYSTEM: &str =
    "You are a seasoned security auditor specialising in source-code reviews.";

/// Everything the control prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub control: &'a ControlRequirement,
    pub evidence: &'a [RetrievedEvidence],
    pub security_overview: Option<&'a str>,
    /// Maximum characters of each evidence item's content.
    pub evidence_char_budget: usize,
}

/// At most `max` characters of `s`, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the base prompt for one control.
pub fn build_control_prompt(input: &PromptInput<'_>) -> String {
    let control = input.control;
    let mut out = String::new();

    out.push_str(CONTROL_SYSTEM);
    out.push_str("\n\n");
    out.push_str(&format!("Control: {} ({})\n", control.id, control.title));
    out.push_str("Requirement:\n");
    out.push_str(control.query_text().trim());
    out.push_str("\n\n");

    if let Some(overview) = input.security_overview.filter(|o| !o.trim().is_empty()) {
        out.push_str("Security overview of the system:\n");
        out.push_str(overview.trim());
        out.push_str("\n\n");
    }

    out.push_str("Based only on the evidence below, decide how the control is implemented.\n\n");
    out.push_str("`control-status` must be exactly one of:\n");
    for status in STATUS_VALUES {
        out.push_str(&format!("- \"{}\"\n", status));
    }
    out.push_str(&format!(
        "\n`control-explanation` explains the decision or describes the gap. \
         `control-configuration` lists configuration settings as \
         {{\"file_path\", \"key_path\", \"line_number\"}} objects and may be empty; \
         it must not be empty when the status mentions configuration. \
         Configuration files must end with one of: {}. \
         `statement-description` describes how the control statement is implemented.\n\n",
        CONFIG_EXTENSIONS.join(" ")
    ));

    out.push_str(&format!("Evidence ({} items):\n", input.evidence.len()));
    for item in input.evidence {
        let lines = match (item.start_line, item.end_line) {
            (Some(s), Some(e)) => format!("lines {}-{}", s, e),
            _ => "whole file".to_string(),
        };
        let label = match item.granularity {
            Granularity::Unit => item.kind.as_str(),
            Granularity::Summary => "summary",
        };
        out.push_str(&format!(
            "- {} | {} | {}\n```\n{}\n```\n",
            label,
            item.source_identifier,
            lines,
            truncate_chars(item.content.trim(), input.evidence_char_budget)
        ));
    }

    out.push_str(
        "\nRespond with a single JSON object with the keys control-status, \
         control-explanation, control-configuration and statement-description. \
         Do not wrap it in markdown fences and do not add comments.\n",
    );
    out
}

/// Base prompt plus a corrective section listing the latest violations.
pub fn with_feedback(base: &str, violations: &[String]) -> String {
    let mut out = String::with_capacity(base.len() + 256);
    out.push_str(base);
    out.push_str("\nYour previous answer was rejected for these reasons:\n");
    for v in violations {
        out.push_str(&format!("- {}\n", v));
    }
    out.push_str("Fix every issue listed above and answer again with the JSON object only.\n");
    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model response is not valid JSON: {reason}")]
pub struct ParseError {
    pub reason: String,
}

/// Extract a JSON value from a model response.
///
/// Tries, in order: the first fenced code block, the whole trimmed text,
/// and the outermost `{...}` span found in surrounding prose.
pub fn parse_model_response(raw: &str) -> Result<Value, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError {
            reason: "empty response".to_string(),
        });
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str(block) {
            return Ok(v);
        }
    }

    let whole_err = match serde_json::from_str(trimmed) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(v);
            }
        }
    }

    Err(ParseError {
        reason: whole_err.to_string(),
    })
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Prompt asking for a one-paragraph security summary of a file.
pub fn build_file_summary_prompt(filename: &str, content: &str, max_chars: usize) -> String {
    format!(
        "{}\n\n\
         Summarise the file below with a focus on:\n\
         * security controls (authentication, authorisation, encryption, input validation)\n\
         * compliance-relevant features (logging, auditing, access roles)\n\
         * obvious risks\n\n\
         Return exactly one concise paragraph of at most 120 words. \
         Do not quote the file verbatim.\n\n\
         ------------ FILE START (name={}) ------------\n\
         {}\n\
         ------------- FILE END -------------\n\n\
         Summary:",
        SUMMARY_SYSTEM,
        filename,
        truncate_chars(content, max_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileSummary, UnitKind};
    use serde_json::json;

    fn control() -> ControlRequirement {
        ControlRequirement {
            id: "AC-3".to_string(),
            title: "Access Enforcement".to_string(),
            statement: "The system enforces access control.".to_string(),
            parameters: vec![],
        }
    }

    fn unit_evidence(path: &str, content: &str) -> RetrievedEvidence {
        RetrievedEvidence {
            source_identifier: path.to_string(),
            granularity: Granularity::Unit,
            kind: UnitKind::Code,
            content: content.to_string(),
            start_line: Some(1),
            end_line: Some(4),
            distance: Some(0.1),
        }
    }

    #[test]
    fn test_prompt_contains_control_and_evidence() {
        let c = control();
        let evidence = vec![
            unit_evidence("auth.py", "def check(jwt_token): ..."),
            RetrievedEvidence::from_summary(
                &FileSummary {
                    source_identifier: "db.go".to_string(),
                    summary_text: "Opens connections.".to_string(),
                    vector_position: 0,
                },
                None,
            ),
        ];
        let prompt = build_control_prompt(&PromptInput {
            control: &c,
            evidence: &evidence,
            security_overview: Some("Service behind an auth gateway."),
            evidence_char_budget: 800,
        });
        assert!(prompt.contains("Control: AC-3 (Access Enforcement)"));
        assert!(prompt.contains("The system enforces access control."));
        assert!(prompt.contains("Service behind an auth gateway."));
        assert!(prompt.contains("- code | auth.py | lines 1-4"));
        assert!(prompt.contains("jwt_token"));
        assert!(prompt.contains("- summary | db.go | whole file"));
        for status in STATUS_VALUES {
            assert!(prompt.contains(status));
        }
    }

    #[test]
    fn test_evidence_truncated_to_budget() {
        let c = control();
        let long = "x".repeat(2000);
        let evidence = vec![unit_evidence("big.py", &long)];
        let prompt = build_control_prompt(&PromptInput {
            control: &c,
            evidence: &evidence,
            security_overview: None,
            evidence_char_budget: 800,
        });
        assert!(prompt.contains(&"x".repeat(800)));
        assert!(!prompt.contains(&"x".repeat(801)));
        assert!(!prompt.contains("Security overview"));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn test_feedback_lists_violations() {
        let prompt = with_feedback("BASE", &["first".to_string(), "second".to_string()]);
        assert!(prompt.starts_with("BASE"));
        assert!(prompt.contains("- first\n- second\n"));
    }

    #[test]
    fn test_parse_plain_json() {
        let v = parse_model_response(r#"{"control-status": "not applicable"}"#).unwrap();
        assert_eq!(v["control-status"], "not applicable");
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(parse_model_response(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_parse_object_in_prose() {
        let raw = "Sure! {\"a\": {\"b\": [1, 2]}} hope that helps";
        assert_eq!(parse_model_response(raw).unwrap(), json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn test_parse_failure() {
        assert!(parse_model_response("I cannot answer that").is_err());
        assert!(parse_model_response("   ").is_err());
        assert!(parse_model_response("{broken").is_err());
    }

    #[test]
    fn test_file_summary_prompt() {
        let prompt = build_file_summary_prompt("auth.py", "abcdef", 3);
        assert!(prompt.contains("name=auth.py"));
        assert!(prompt.contains("\nabc\n"));
        assert!(!prompt.contains("abcd"));
        assert!(prompt.ends_with("Summary:"));
    }
}
