//! Control mapping record templates.
//!
//! A template is a structurally complete [`ControlMappingRecord`] carrying
//! conservative defaults. Generation fills it in: fully from validated
//! content ([`apply_validated`]) or only with the well-typed parts of
//! rejected content ([`apply_partial`]).

use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    Annotation, ConfigurationRef, ControlMappingRecord, Property, PropertyValue, Statement,
};
use crate::validate::{parse_configuration_entry, STATUS_NOT_SATISFIED};

pub const PROP_STATUS: &str = "control-status";
pub const PROP_NAME: &str = "control-name";
pub const PROP_DESCRIPTION: &str = "control-description";
pub const PROP_EXPLANATION: &str = "control-explanation";
pub const PROP_CONFIGURATION: &str = "control-configuration";
pub const ANNOTATION_SOURCE_CODE: &str = "source-code-reference";

/// Status a record keeps unless validated content says otherwise.
pub const DEFAULT_STATUS: &str = STATUS_NOT_SATISFIED;

const NS_PREFIX: &str = "urn:control-mapper";

fn ns(suffix: &str) -> String {
    format!("{}:{}", NS_PREFIX, suffix)
}

fn text_prop(name: &str, value: &str, ns_suffix: &str) -> Property {
    Property {
        name: name.to_string(),
        value: PropertyValue::Text(value.to_string()),
        namespace: ns(ns_suffix),
    }
}

/// The statement id of a control's single statement.
pub fn statement_id_for(control_id: &str) -> String {
    format!("{}_smt.a", control_id)
}

/// Build a structurally valid record with default content.
pub fn create_template(
    control_id: &str,
    control_name: &str,
    control_description: &str,
    main_id: &str,
    statement_id: &str,
) -> ControlMappingRecord {
    ControlMappingRecord {
        uuid: main_id.to_string(),
        control_id: control_id.to_string(),
        properties: vec![
            text_prop(PROP_STATUS, DEFAULT_STATUS, "control-status-reference"),
            text_prop(PROP_NAME, control_name, "control-name-reference"),
            text_prop(
                PROP_DESCRIPTION,
                control_description,
                "control-description-reference",
            ),
            text_prop(PROP_EXPLANATION, "", "explanation-reference"),
            Property {
                name: PROP_CONFIGURATION.to_string(),
                value: PropertyValue::Configuration(Vec::new()),
                namespace: ns("configuration-reference"),
            },
        ],
        annotations: vec![Annotation {
            name: ANNOTATION_SOURCE_CODE.to_string(),
            value_list: Vec::new(),
            namespace: ns("source-code-reference"),
        }],
        statements: vec![Statement {
            statement_id: statement_id_for(control_id),
            uuid: statement_id.to_string(),
            description: String::new(),
        }],
    }
}

/// [`create_template`] with fresh v4 uuids for the record and statement.
pub fn new_template(
    control_id: &str,
    control_name: &str,
    control_description: &str,
) -> ControlMappingRecord {
    create_template(
        control_id,
        control_name,
        control_description,
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
    )
}

fn set_text(record: &mut ControlMappingRecord, name: &str, value: &str) {
    if let Some(prop) = record.property_mut(name) {
        prop.value = PropertyValue::Text(value.to_string());
    }
}

fn set_configuration(record: &mut ControlMappingRecord, entries: Vec<ConfigurationRef>) {
    if let Some(prop) = record.property_mut(PROP_CONFIGURATION) {
        prop.value = PropertyValue::Configuration(entries);
    }
}

fn set_statement_description(record: &mut ControlMappingRecord, description: &str) {
    if let Some(statement) = record.statements.first_mut() {
        statement.description = description.to_string();
    }
}

/// Replace the evidence annotation with `paths`, in order.
pub fn set_evidence(record: &mut ControlMappingRecord, paths: Vec<String>) {
    match record
        .annotations
        .iter_mut()
        .find(|a| a.name == ANNOTATION_SOURCE_CODE)
    {
        Some(annotation) => annotation.value_list = paths,
        None => record.annotations.push(Annotation {
            name: ANNOTATION_SOURCE_CODE.to_string(),
            value_list: paths,
            namespace: ns("source-code-reference"),
        }),
    }
}

/// Merge content that passed validation.
pub fn apply_validated(record: &mut ControlMappingRecord, content: &Value) {
    if let Some(status) = content.get("control-status").and_then(Value::as_str) {
        set_text(record, PROP_STATUS, status);
    }
    apply_partial(record, content);
}

/// Merge the well-typed fields of content that failed validation.
///
/// `control-status` is left untouched. Malformed configuration entries are
/// dropped individually.
pub fn apply_partial(record: &mut ControlMappingRecord, content: &Value) {
    if let Some(explanation) = content.get("control-explanation").and_then(Value::as_str) {
        set_text(record, PROP_EXPLANATION, explanation);
    }
    if let Some(entries) = content
        .get("control-configuration")
        .and_then(Value::as_array)
    {
        let parsed: Vec<ConfigurationRef> = entries
            .iter()
            .filter_map(|e| parse_configuration_entry(e).ok())
            .collect();
        set_configuration(record, parsed);
    }
    if let Some(desc) = content.get("statement-description").and_then(Value::as_str) {
        set_statement_description(record, desc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::STATUS_CONFIGURATION;
    use serde_json::json;

    fn template() -> ControlMappingRecord {
        create_template("AC-3", "Access Enforcement", "Enforce approved authorizations.", "m-1", "s-1")
    }

    #[test]
    fn test_template_defaults() {
        let record = template();
        assert_eq!(record.uuid, "m-1");
        assert_eq!(record.text_property(PROP_STATUS), Some(DEFAULT_STATUS));
        assert_eq!(record.text_property(PROP_NAME), Some("Access Enforcement"));
        assert_eq!(record.text_property(PROP_EXPLANATION), Some(""));
        assert_eq!(
            record.property(PROP_CONFIGURATION).unwrap().value,
            PropertyValue::Configuration(vec![])
        );
        assert_eq!(record.statements[0].statement_id, "AC-3_smt.a");
        assert_eq!(record.statements[0].uuid, "s-1");
        assert!(record.annotation(ANNOTATION_SOURCE_CODE).unwrap().value_list.is_empty());
        assert_eq!(
            record.property(PROP_STATUS).unwrap().namespace,
            "urn:control-mapper:control-status-reference"
        );
    }

    #[test]
    fn test_new_template_ids_distinct() {
        let a = new_template("AC-3", "n", "d");
        let b = new_template("AC-3", "n", "d");
        assert_ne!(a.uuid, b.uuid);
        assert_ne!(a.uuid, a.statements[0].uuid);
        assert_eq!(a.uuid.len(), 36);
    }

    #[test]
    fn test_apply_validated() {
        let mut record = template();
        apply_validated(
            &mut record,
            &json!({
                "control-status": STATUS_CONFIGURATION,
                "control-explanation": "TLS is enabled through the ingress values.",
                "control-configuration": [
                    {"file_path": "values.yaml", "key_path": "ingress.tls", "line_number": 8}
                ],
                "statement-description": "Ingress terminates TLS."
            }),
        );
        assert_eq!(record.text_property(PROP_STATUS), Some(STATUS_CONFIGURATION));
        assert_eq!(record.statements[0].description, "Ingress terminates TLS.");
        match &record.property(PROP_CONFIGURATION).unwrap().value {
            PropertyValue::Configuration(entries) => assert_eq!(entries[0].key_path, "ingress.tls"),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_apply_partial_keeps_status_and_drops_bad_entries() {
        let mut record = template();
        apply_partial(
            &mut record,
            &json!({
                "control-status": "fully satisfied",
                "control-explanation": 42,
                "control-configuration": [
                    {"file_path": "README.md", "key_path": "x", "line_number": 1},
                    {"file_path": "app.json", "key_path": "auth.mode", "line_number": 2}
                ],
                "statement-description": "Partial."
            }),
        );
        assert_eq!(record.text_property(PROP_STATUS), Some(DEFAULT_STATUS));
        assert_eq!(record.text_property(PROP_EXPLANATION), Some(""));
        assert_eq!(record.statements[0].description, "Partial.");
        match &record.property(PROP_CONFIGURATION).unwrap().value {
            PropertyValue::Configuration(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].file_path, "app.json");
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_set_evidence() {
        let mut record = template();
        set_evidence(&mut record, vec!["auth.py".to_string()]);
        assert_eq!(
            record.annotation(ANNOTATION_SOURCE_CODE).unwrap().value_list,
            vec!["auth.py"]
        );
        record.annotations.clear();
        set_evidence(&mut record, vec!["b.go".to_string()]);
        assert_eq!(record.annotations.len(), 1);
    }
}
