//! Dual-granularity retrieval merge.
//!
//! # Algorithm
//!
//! 1. Search the unit collection for the top-`k` neighbors of the query.
//! 2. Search the summary collection (when one was built) for its top-`k`.
//! 3. Concatenate, unit results first, dropping sentinel padding.
//! 4. Append hint-table hits for the requested control, if any.
//! 5. Deduplicate by merge key, keeping the first occurrence.
//!
//! The merge key is the source path. A summary without a path falls back to
//! its summary text. There is no relevance threshold: the semantic part
//! contributes at most `2k` items.

use std::collections::HashSet;

use crate::hints::normalize_control_id;
use crate::index::IndexError;
use crate::models::{EvidenceUnit, FileSummary, RetrievedEvidence};
use crate::store::IndexedCollection;

/// The collections a retrieval runs against.
#[derive(Clone, Copy)]
pub struct Corpus<'a> {
    pub units: &'a IndexedCollection<EvidenceUnit>,
    pub summaries: Option<&'a IndexedCollection<FileSummary>>,
}

/// Retrieve evidence for an already-embedded query.
///
/// `control_id`, when given, also pulls in every unit tagged with that
/// control (and the summaries of the tagged files).
pub fn retrieve_with_vector(
    corpus: Corpus<'_>,
    query: &[f32],
    k: usize,
    control_id: Option<&str>,
) -> Result<Vec<RetrievedEvidence>, IndexError> {
    let mut candidates: Vec<RetrievedEvidence> = corpus
        .units
        .search(query, k)?
        .into_iter()
        .map(|(unit, d)| RetrievedEvidence::from_unit(unit, Some(d)))
        .collect();

    if let Some(summaries) = corpus.summaries {
        candidates.extend(
            summaries
                .search(query, k)?
                .into_iter()
                .map(|(s, d)| RetrievedEvidence::from_summary(s, Some(d))),
        );
    }

    if let Some(id) = control_id.and_then(normalize_control_id) {
        candidates.extend(hinted(corpus, &id));
    }

    Ok(dedup(candidates))
}

fn hinted(corpus: Corpus<'_>, control_id: &str) -> Vec<RetrievedEvidence> {
    let units: Vec<&EvidenceUnit> = corpus
        .units
        .store()
        .iter()
        .filter(|u| u.hint_tags.contains(control_id))
        .collect();

    let mut out: Vec<RetrievedEvidence> = units
        .iter()
        .map(|u| RetrievedEvidence::from_unit(u, None))
        .collect();

    if let Some(summaries) = corpus.summaries {
        let files: HashSet<&str> = units.iter().map(|u| u.source_identifier.as_str()).collect();
        out.extend(
            summaries
                .store()
                .iter()
                .filter(|s| files.contains(s.source_identifier.as_str()))
                .map(|s| RetrievedEvidence::from_summary(s, None)),
        );
    }
    out
}

fn merge_key(item: &RetrievedEvidence) -> &str {
    if item.source_identifier.is_empty() {
        &item.content
    } else {
        &item.source_identifier
    }
}

/// Keep the first item per merge key, preserving order.
pub fn dedup(items: Vec<RetrievedEvidence>) -> Vec<RetrievedEvidence> {
    let mut seen: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(merge_key(item).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Granularity, UnitKind};
    use crate::segment::segment;

    fn unit(path: &str, content: &str) -> EvidenceUnit {
        segment(path, content, UnitKind::Unknown).remove(0)
    }

    fn summary(path: &str, text: &str, pos: usize) -> FileSummary {
        FileSummary {
            source_identifier: path.to_string(),
            summary_text: text.to_string(),
            vector_position: pos,
        }
    }

    fn units() -> IndexedCollection<EvidenceUnit> {
        IndexedCollection::build(vec![
            (unit("auth.py", "jwt_token = decode()"), vec![1.0, 0.0]),
            (unit("auth.py", "def logout(): pass"), vec![0.9, 0.1]),
            (unit("db.go", "func open() {}"), vec![0.0, 1.0]),
        ])
        .unwrap()
    }

    fn summaries() -> IndexedCollection<FileSummary> {
        IndexedCollection::build(vec![
            (summary("db.go", "Opens the database.", 0), vec![0.1, 0.9]),
            (summary("auth.py", "Handles login.", 1), vec![1.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_units_only_top_k() {
        let u = units();
        let corpus = Corpus {
            units: &u,
            summaries: None,
        };
        let hits = retrieve_with_vector(corpus, &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_identifier, "auth.py");
        assert_eq!(hits[0].granularity, Granularity::Unit);
    }

    #[test]
    fn test_merge_dedups_across_indices() {
        let u = units();
        let s = summaries();
        let corpus = Corpus {
            units: &u,
            summaries: Some(&s),
        };
        let hits = retrieve_with_vector(corpus, &[1.0, 0.0], 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.source_identifier.as_str()).collect();
        assert_eq!(ids, vec!["auth.py", "db.go"]);
        // unit results come first
        assert_eq!(hits[1].granularity, Granularity::Unit);
    }

    #[test]
    fn test_sentinels_dropped() {
        let u = units();
        let corpus = Corpus {
            units: &u,
            summaries: None,
        };
        let hits = retrieve_with_vector(corpus, &[0.0, 1.0], 10, None).unwrap();
        assert!(hits.iter().all(|h| h.distance.unwrap().is_finite()));
    }

    #[test]
    fn test_summary_without_path_keyed_by_text() {
        let items = vec![
            RetrievedEvidence::from_summary(&summary("", "Same text", 0), None),
            RetrievedEvidence::from_summary(&summary("", "Same text", 1), None),
            RetrievedEvidence::from_summary(&summary("", "Other text", 2), None),
        ];
        assert_eq!(dedup(items).len(), 2);
    }

    #[test]
    fn test_hint_hits_appended() {
        let u = IndexedCollection::build(vec![
            (unit("a.py", "plain"), vec![0.0]),
            (unit("tls.py", "use https here"), vec![10.0]),
        ])
        .unwrap();
        let corpus = Corpus {
            units: &u,
            summaries: None,
        };
        let hits = retrieve_with_vector(corpus, &[0.0], 1, Some("sc12")).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.source_identifier.as_str()).collect();
        assert_eq!(ids, vec!["a.py", "tls.py"]);
        assert_eq!(hits[1].distance, None);
    }

    #[test]
    fn test_query_dimension_error() {
        let u = units();
        let corpus = Corpus {
            units: &u,
            summaries: None,
        };
        assert!(retrieve_with_vector(corpus, &[1.0], 1, None).is_err());
    }
}
