//! Content validation for model output.
//!
//! [`validate`] checks the fields a model is asked to produce before they
//! are merged into a template. It never panics and never errors: every
//! problem becomes a human-readable violation string that can be sent back
//! to the model as corrective feedback.
//!
//! Checks, in order:
//!
//! 1. The content is a JSON object.
//! 2. `control-status` is present and one of [`STATUS_VALUES`].
//! 3. `control-explanation` is a string of at least
//!    [`MIN_EXPLANATION_CHARS`] characters after trimming.
//! 4. `control-configuration`, if present, is a list of well-formed
//!    configuration references pointing at configuration files.
//! 5. A status mentioning "configuration" has a non-empty configuration.
//! 6. `statement-description`, if present, is a string.

use serde_json::Value;

use crate::models::ConfigurationRef;

pub const STATUS_INHERENTLY_SATISFIED: &str = "applicable and inherently satisfied";
pub const STATUS_CONFIGURATION: &str = "applicable but only satisfied through configuration";
pub const STATUS_PARTIALLY_SATISFIED: &str = "applicable but partially satisfied";
pub const STATUS_NOT_SATISFIED: &str = "applicable and not satisfied";
pub const STATUS_NOT_APPLICABLE: &str = "not applicable";

pub const STATUS_VALUES: [&str; 5] = [
    STATUS_INHERENTLY_SATISFIED,
    STATUS_CONFIGURATION,
    STATUS_PARTIALLY_SATISFIED,
    STATUS_NOT_SATISFIED,
    STATUS_NOT_APPLICABLE,
];

/// Extensions accepted for `control-configuration[].file_path`.
pub const CONFIG_EXTENSIONS: [&str; 7] = [
    ".yaml",
    ".yml",
    ".json",
    ".toml",
    ".ini",
    ".conf",
    ".properties",
];

pub const MIN_EXPLANATION_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

impl ValidationOutcome {
    fn from_violations(violations: Vec<String>) -> Self {
        Self {
            is_valid: violations.is_empty(),
            violations,
        }
    }
}

/// Validate one candidate content object.
pub fn validate(content: &Value) -> ValidationOutcome {
    let Some(obj) = content.as_object() else {
        return ValidationOutcome::from_violations(vec![format!(
            "content must be a JSON object, got {}",
            type_name(content)
        )]);
    };

    let mut violations = Vec::new();

    let status = match obj.get("control-status") {
        None => {
            violations.push("missing required field: control-status".to_string());
            None
        }
        Some(Value::String(s)) if STATUS_VALUES.contains(&s.as_str()) => Some(s.as_str()),
        Some(Value::String(s)) => {
            violations.push(format!(
                "invalid control-status value: '{}'. Must be one of: {}",
                s,
                STATUS_VALUES.join(", ")
            ));
            None
        }
        Some(other) => {
            violations.push(format!(
                "control-status must be a string, got {}",
                type_name(other)
            ));
            None
        }
    };

    match obj.get("control-explanation") {
        None => violations.push("missing required field: control-explanation".to_string()),
        Some(Value::String(s)) => {
            let len = s.trim().chars().count();
            if len < MIN_EXPLANATION_CHARS {
                violations.push(format!(
                    "control-explanation is too short ({} characters, minimum {})",
                    len, MIN_EXPLANATION_CHARS
                ));
            }
        }
        Some(other) => violations.push(format!(
            "control-explanation must be a string, got {}",
            type_name(other)
        )),
    }

    let mut configuration_len = 0;
    if let Some(config) = obj.get("control-configuration") {
        match config.as_array() {
            Some(entries) => {
                configuration_len = entries.len();
                for (i, entry) in entries.iter().enumerate() {
                    if let Err(issues) = parse_configuration_entry(entry) {
                        violations.extend(
                            issues
                                .into_iter()
                                .map(|issue| format!("control-configuration[{}]: {}", i, issue)),
                        );
                    }
                }
            }
            None => violations.push(format!(
                "control-configuration must be a list, got {}",
                type_name(config)
            )),
        }
    }

    if let Some(status) = status {
        if status.contains("configuration") && configuration_len == 0 {
            violations.push(format!(
                "control-status '{}' requires a non-empty control-configuration",
                status
            ));
        }
    }

    if let Some(desc) = obj.get("statement-description") {
        if !desc.is_string() {
            violations.push(format!(
                "statement-description must be a string, got {}",
                type_name(desc)
            ));
        }
    }

    ValidationOutcome::from_violations(violations)
}

/// Parse one `control-configuration` entry, collecting every issue.
pub fn parse_configuration_entry(entry: &Value) -> Result<ConfigurationRef, Vec<String>> {
    let Some(obj) = entry.as_object() else {
        return Err(vec![format!("must be an object, got {}", type_name(entry))]);
    };

    let mut issues = Vec::new();

    let file_path = match obj.get("file_path") {
        Some(Value::String(p)) => {
            if !has_config_extension(p) {
                issues.push(format!(
                    "file_path '{}' must end with one of: {}",
                    p,
                    CONFIG_EXTENSIONS.join(", ")
                ));
            }
            Some(p.clone())
        }
        Some(other) => {
            issues.push(format!("file_path must be a string, got {}", type_name(other)));
            None
        }
        None => {
            issues.push("missing file_path".to_string());
            None
        }
    };

    let key_path = match obj.get("key_path") {
        Some(Value::String(k)) => Some(k.clone()),
        Some(other) => {
            issues.push(format!("key_path must be a string, got {}", type_name(other)));
            None
        }
        None => {
            issues.push("missing key_path".to_string());
            None
        }
    };

    let line_number = match obj.get("line_number") {
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => {
                issues.push(format!("line_number must be an integer, got {}", type_name(v)));
                None
            }
        },
        None => {
            issues.push("missing line_number".to_string());
            None
        }
    };

    match (file_path, key_path, line_number) {
        (Some(file_path), Some(key_path), Some(line_number)) if issues.is_empty() => {
            Ok(ConfigurationRef {
                file_path,
                key_path,
                line_number,
            })
        }
        _ => Err(issues),
    }
}

fn has_config_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    CONFIG_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
