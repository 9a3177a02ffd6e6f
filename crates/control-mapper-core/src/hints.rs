//! Rule signals and the keyword hint table.
//!
//! Two sources of control hints are attached to every evidence unit:
//!
//! 1. **Rule signals**: fixed substring checks producing [`DerivedFlags`],
//!    with `uses_tls → SC-12` and `auth_check → AC-6`.
//! 2. **Hint table**: an explicit mapping from control id to generic and
//!    per-language keyword lists, loaded from a TOML file at startup:
//!
//! ```toml
//! [controls."SC-8"]
//! generic = ["tls", "https"]
//! python = ["ssl.create_default_context"]
//! golang = ["tls.Config"]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::models::DerivedFlags;
use crate::segment::Language;

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("invalid hint table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid control id in hint table: '{0}'")]
    InvalidControlId(String),
}

/// Compute the boolean rule signals for a piece of text.
pub fn derive_flags(content: &str) -> DerivedFlags {
    let lower = content.to_lowercase();
    DerivedFlags {
        uses_tls: lower.contains("tls") || lower.contains("https"),
        hardcoded_secret: lower.contains("secret") || lower.contains("apikey"),
        auth_check: lower.contains("token") || lower.contains("auth"),
    }
}

/// Control ids implied by the rule signals alone.
pub fn rule_tags(flags: &DerivedFlags) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if flags.uses_tls {
        tags.insert("SC-12".to_string());
    }
    if flags.auth_check {
        tags.insert("AC-6".to_string());
    }
    tags
}

/// Normalize a control id to its canonical `FAMILY-N` form.
///
/// `sc8`, `SC8`, `sc-8` and `SC-8` all become `SC-8`; enhancement suffixes
/// are preserved (`ac2.1` → `AC-2.1`). Returns `None` for ids without a
/// leading alphabetic family.
pub fn normalize_control_id(id: &str) -> Option<String> {
    let compact: String = id
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let split = compact
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(compact.len());
    if split == 0 {
        return None;
    }
    let (family, rest) = compact.split_at(split);
    if rest.is_empty() {
        Some(family.to_string())
    } else {
        Some(format!("{}-{}", family, rest))
    }
}

/// Keyword lists for one control.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlHints {
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub python: Vec<String>,
    #[serde(default)]
    pub golang: Vec<String>,
    #[serde(default)]
    pub java: Vec<String>,
    #[serde(default)]
    pub cpp: Vec<String>,
}

impl ControlHints {
    fn for_language(&self, language: Language) -> &[String] {
        match language {
            Language::Python => &self.python,
            Language::Go => &self.golang,
            Language::Java => &self.java,
            Language::CFamily => &self.cpp,
            _ => &[],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHintTable {
    #[serde(default)]
    controls: BTreeMap<String, ControlHints>,
}

/// Statically typed control-id → keywords mapping.
#[derive(Debug, Clone, Default)]
pub struct HintTable {
    controls: BTreeMap<String, ControlHints>,
}

impl HintTable {
    /// Parse a hint table from TOML, normalizing every control id.
    ///
    /// Keywords are lowercased once here so matching can work on lowercased
    /// content.
    pub fn from_toml_str(text: &str) -> Result<Self, HintError> {
        let raw: RawHintTable = toml::from_str(text)?;
        let mut controls = BTreeMap::new();
        for (id, mut hints) in raw.controls {
            let normalized =
                normalize_control_id(&id).ok_or_else(|| HintError::InvalidControlId(id.clone()))?;
            for list in [
                &mut hints.generic,
                &mut hints.python,
                &mut hints.golang,
                &mut hints.java,
                &mut hints.cpp,
            ] {
                *list = list
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
            }
            controls.insert(normalized, hints);
        }
        Ok(Self { controls })
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn get(&self, control_id: &str) -> Option<&ControlHints> {
        normalize_control_id(control_id).and_then(|id| self.controls.get(&id))
    }

    /// Control ids whose generic or language-specific keywords occur in
    /// `content` (case-insensitive substring match).
    pub fn tags_for(&self, content: &str, language: Language) -> BTreeSet<String> {
        let lower = content.to_lowercase();
        self.controls
            .iter()
            .filter(|(_, hints)| {
                hints
                    .generic
                    .iter()
                    .chain(hints.for_language(language).iter())
                    .any(|kw| lower.contains(kw.as_str()))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
[controls.sc8]
generic = ["TLS", "https"]
python = ["ssl.create_default_context"]
golang = ["tls.Config"]

[controls."AC-10"]
generic = ["max_sessions"]
"#;

    #[test]
    fn test_flags_from_content() {
        let flags = derive_flags("requests.get('https://x', headers={'Authorization': token})");
        assert!(flags.uses_tls);
        assert!(flags.auth_check);
        assert!(!flags.hardcoded_secret);
        let tags = rule_tags(&flags);
        assert!(tags.contains("SC-12"));
        assert!(tags.contains("AC-6"));
    }

    #[test]
    fn test_no_signals() {
        let flags = derive_flags("fn add(a: i32, b: i32) -> i32 { a + b }");
        assert_eq!(flags, DerivedFlags::default());
        assert!(rule_tags(&flags).is_empty());
    }

    #[test]
    fn test_normalize_control_id() {
        assert_eq!(normalize_control_id("sc8").as_deref(), Some("SC-8"));
        assert_eq!(normalize_control_id("SC-8").as_deref(), Some("SC-8"));
        assert_eq!(normalize_control_id("ac2.1").as_deref(), Some("AC-2.1"));
        assert_eq!(normalize_control_id("pm").as_deref(), Some("PM"));
        assert_eq!(normalize_control_id("42"), None);
        assert_eq!(normalize_control_id(""), None);
    }

    #[test]
    fn test_table_parses_and_normalizes() {
        let table = HintTable::from_toml_str(TABLE).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.get("SC-8").is_some());
        assert!(table.get("ac10").is_some());
        assert_eq!(table.get("sc-8").unwrap().generic, vec!["tls", "https"]);
    }

    #[test]
    fn test_language_specific_keywords() {
        let table = HintTable::from_toml_str(TABLE).unwrap();
        let go_src = "cfg := &tls.Config{MinVersion: 3}";
        assert!(table.tags_for(go_src, Language::Go).contains("SC-8"));

        let py_src = "ctx = ssl.create_default_context()";
        assert!(table.tags_for(py_src, Language::Python).contains("SC-8"));
        assert!(!table.tags_for(py_src, Language::Go).contains("SC-8"));
    }

    #[test]
    fn test_generic_keywords_apply_everywhere() {
        let table = HintTable::from_toml_str(TABLE).unwrap();
        let tags = table.tags_for("max_sessions: 3", Language::Other);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["AC-10"]);
    }

    #[test]
    fn test_invalid_control_id_rejected() {
        let err = HintTable::from_toml_str("[controls.\"123\"]\ngeneric = [\"x\"]\n").unwrap_err();
        assert!(matches!(err, HintError::InvalidControlId(_)));
    }
}
