//! Batch-wide identifier uniqueness.
//!
//! Every record uuid and statement uuid in one batch of control mapping
//! records must be distinct. The check runs once, after all generation.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::models::ControlMappingRecord;

/// Where a duplicated identifier was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdLocation {
    Record,
    Statement,
}

impl fmt::Display for IdLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdLocation::Record => write!(f, "record"),
            IdLocation::Statement => write!(f, "statement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("duplicate {location} id '{value}' in control {control_id}")]
pub struct DuplicateIdError {
    pub value: String,
    pub control_id: String,
    pub location: IdLocation,
}

/// Seen-set of identifiers for one batch.
#[derive(Debug, Default)]
pub struct UniquenessRegistry {
    seen: HashSet<String>,
}

impl UniquenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one identifier. Fails if it was already registered.
    pub fn register(
        &mut self,
        value: &str,
        control_id: &str,
        location: IdLocation,
    ) -> Result<(), DuplicateIdError> {
        if self.seen.insert(value.to_string()) {
            Ok(())
        } else {
            Err(DuplicateIdError {
                value: value.to_string(),
                control_id: control_id.to_string(),
                location,
            })
        }
    }

    /// Register a record's uuid and all its statement uuids.
    pub fn register_record(&mut self, record: &ControlMappingRecord) -> Result<(), DuplicateIdError> {
        self.register(&record.uuid, &record.control_id, IdLocation::Record)?;
        for statement in &record.statements {
            self.register(&statement.uuid, &record.control_id, IdLocation::Statement)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Check a whole batch, reporting the first duplicate in record order.
pub fn check_unique_ids(records: &[ControlMappingRecord]) -> Result<(), DuplicateIdError> {
    let mut registry = UniquenessRegistry::new();
    for record in records {
        registry.register_record(record)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::create_template;

    #[test]
    fn test_unique_batch_passes() {
        let records = vec![
            create_template("AC-1", "a", "a", "m1", "s1"),
            create_template("AC-2", "b", "b", "m2", "s2"),
        ];
        assert!(check_unique_ids(&records).is_ok());
    }

    #[test]
    fn test_shared_statement_uuid_reported_once() {
        let records = vec![
            create_template("AC-1", "a", "a", "m1", "shared"),
            create_template("AC-2", "b", "b", "m2", "shared"),
        ];
        let err = check_unique_ids(&records).unwrap_err();
        assert_eq!(
            err,
            DuplicateIdError {
                value: "shared".to_string(),
                control_id: "AC-2".to_string(),
                location: IdLocation::Statement,
            }
        );
        assert_eq!(err.to_string(), "duplicate statement id 'shared' in control AC-2");
    }

    #[test]
    fn test_record_and_statement_share_namespace() {
        let records = vec![create_template("AC-1", "a", "a", "same", "same")];
        let err = check_unique_ids(&records).unwrap_err();
        assert_eq!(err.location, IdLocation::Statement);
    }

    #[test]
    fn test_registry_counts() {
        let mut registry = UniquenessRegistry::new();
        assert!(registry.is_empty());
        registry.register("x", "AC-1", IdLocation::Record).unwrap();
        assert!(registry.register("x", "AC-1", IdLocation::Record).is_err());
        assert_eq!(registry.len(), 1);
    }
}
