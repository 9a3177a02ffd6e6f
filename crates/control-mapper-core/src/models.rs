//! Core data models shared by the indexing and generation pipelines.
//!
//! Evidence units and file summaries flow out of the indexer into the
//! metadata stores; control requirements flow in from the caller; control
//! mapping records are the externally visible output.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Coarse classification of a source file, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Code,
    Config,
    Doc,
    Unknown,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Code => "code",
            UnitKind::Config => "config",
            UnitKind::Doc => "doc",
            UnitKind::Unknown => "unknown",
        }
    }
}

/// Surface-level boolean signals computed from a unit's text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFlags {
    pub uses_tls: bool,
    pub hardcoded_secret: bool,
    pub auth_check: bool,
}

/// A contiguous span of one file's content, retrievable as one item.
///
/// Offsets are byte offsets into the original file (`start..end`), lines
/// are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceUnit {
    pub content: String,
    pub source_identifier: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub unit_kind: UnitKind,
    #[serde(default)]
    pub derived_flags: DerivedFlags,
    #[serde(default)]
    pub hint_tags: BTreeSet<String>,
    /// SHA-256 of `content`, hex encoded.
    pub content_hash: String,
}

/// A generated abstract of one whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub source_identifier: String,
    pub summary_text: String,
    pub vector_position: usize,
}

/// One organization-defined parameter of a control, already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlParameter {
    pub id: String,
    pub resolved_text: String,
}

/// A control's textual requirement, supplied pre-resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequirement {
    pub id: String,
    pub title: String,
    pub statement: String,
    #[serde(default)]
    pub parameters: Vec<ControlParameter>,
}

impl ControlRequirement {
    /// Flatten the statement and its parameters into one query text.
    ///
    /// `{{ insert: param, <id> }}` placeholders are substituted inline.
    /// Parameters with no placeholder in the statement are appended as an
    /// "Additional requirements" list so their text still reaches retrieval.
    pub fn query_text(&self) -> String {
        let mut text = self.statement.clone();
        let mut additional = Vec::new();

        for param in &self.parameters {
            let placeholder = format!("{{{{ insert: param, {} }}}}", param.id);
            if text.contains(&placeholder) {
                text = text.replace(&placeholder, &param.resolved_text);
            } else if !param.resolved_text.trim().is_empty() {
                additional.push(param.resolved_text.trim().to_string());
            }
        }

        if !additional.is_empty() {
            text.push_str("\n\nAdditional requirements:\n");
            let bullets: Vec<String> = additional.iter().map(|p| format!("- {}", p)).collect();
            text.push_str(&bullets.join("\n"));
        }

        text
    }
}

/// Which index a retrieved item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Unit,
    Summary,
}

/// One item of the merged, deduplicated evidence set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedEvidence {
    pub source_identifier: String,
    pub granularity: Granularity,
    pub kind: UnitKind,
    pub content: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    /// Squared Euclidean distance to the query; `None` for hint-table hits.
    pub distance: Option<f32>,
}

impl RetrievedEvidence {
    pub fn from_unit(unit: &EvidenceUnit, distance: Option<f32>) -> Self {
        Self {
            source_identifier: unit.source_identifier.clone(),
            granularity: Granularity::Unit,
            kind: unit.unit_kind,
            content: unit.content.clone(),
            start_line: Some(unit.start_line),
            end_line: Some(unit.end_line),
            distance,
        }
    }

    pub fn from_summary(summary: &FileSummary, distance: Option<f32>) -> Self {
        Self {
            source_identifier: summary.source_identifier.clone(),
            granularity: Granularity::Summary,
            kind: UnitKind::Doc,
            content: summary.summary_text.clone(),
            start_line: None,
            end_line: None,
            distance,
        }
    }
}

/// One `control-configuration` entry pointing at a configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRef {
    pub file_path: String,
    pub key_path: String,
    pub line_number: i64,
}

/// The value of a record property: free text or configuration references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Configuration(Vec<ConfigurationRef>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
    #[serde(rename = "ns")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(rename = "value")]
    pub value_list: Vec<String>,
    #[serde(rename = "ns")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "statement-id")]
    pub statement_id: String,
    pub uuid: String,
    pub description: String,
}

/// The structured output asserting how a control is implemented.
///
/// Serialized with OSCAL `implemented-requirement` field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMappingRecord {
    pub uuid: String,
    #[serde(rename = "control-id")]
    pub control_id: String,
    #[serde(rename = "props")]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

impl ControlMappingRecord {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Text value of a property, if present and textual.
    pub fn text_property(&self, name: &str) -> Option<&str> {
        match self.property(name).map(|p| &p.value) {
            Some(PropertyValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }
}
