//! Restores full record context to model output.
//!
//! The model only echoes ids and the topics it assigned. Everything else is
//! copied from the authoritative records; a partial whose id the caller never
//! sent is dropped.

use crate::models::{PartialRecord, Record, Topic};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of merging partial records onto authoritative ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Merged records, in the order their ids first appeared in the partials
    pub records: Vec<Record>,
    /// Partial ids with no authoritative record
    pub orphan_ids: Vec<String>,
    /// Ids that appeared more than once in the authoritative input
    pub duplicate_ids: Vec<String>,
}

/// Merge `partials` onto `authoritative`, returning only the merged records.
pub fn hydrate(partials: Vec<PartialRecord>, authoritative: &[Record]) -> Vec<Record> {
    reconcile(partials, authoritative).records
}

/// Merge `partials` onto `authoritative` and report what was dropped.
///
/// - The topics of a matched partial replace the record's topics; `text` and
///   `vote_tally` are carried over untouched.
/// - If an id occurs more than once in `authoritative`, the last occurrence
///   wins and the id is reported in `duplicate_ids`.
/// - If an id occurs more than once in `partials`, the record is emitted once
///   at its first position with the topics of all occurrences merged.
pub fn reconcile(partials: Vec<PartialRecord>, authoritative: &[Record]) -> Reconciliation {
    let mut lookup: HashMap<&str, &Record> = HashMap::with_capacity(authoritative.len());
    let mut duplicate_ids = Vec::new();
    for record in authoritative {
        if lookup.insert(record.id.as_str(), record).is_some() {
            warn!(id = %record.id, "Duplicate id in authoritative records, keeping the last one");
            if !duplicate_ids.contains(&record.id) {
                duplicate_ids.push(record.id.clone());
            }
        }
    }

    let mut records: Vec<Record> = Vec::with_capacity(partials.len());
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut orphan_ids = Vec::new();

    for partial in partials {
        let Some(original) = lookup.get(partial.id.as_str()) else {
            warn!(id = %partial.id, "Model returned an id with no matching record, dropping it");
            orphan_ids.push(partial.id);
            continue;
        };

        match position.get(&partial.id) {
            Some(&index) => {
                debug!(id = %partial.id, "Id repeated in model output, merging topics");
                merge_topics(&mut records[index].topics, partial.topics);
            }
            None => {
                let mut record = (*original).clone();
                record.topics = partial.topics;
                position.insert(partial.id, records.len());
                records.push(record);
            }
        }
    }

    Reconciliation {
        records,
        orphan_ids,
        duplicate_ids,
    }
}

/// Collapse records sharing an id into one.
///
/// Same rule as [`reconcile`]: the last occurrence's content wins. The record
/// keeps the position where its id first appeared. Returns the unique records
/// and the ids that were repeated.
pub fn dedupe_by_id(records: &[Record]) -> (Vec<Record>, Vec<String>) {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<Record> = Vec::with_capacity(records.len());
    let mut duplicate_ids = Vec::new();

    for record in records {
        match position.get(record.id.as_str()) {
            Some(&index) => {
                warn!(id = %record.id, "Duplicate record id, keeping the last one");
                if !duplicate_ids.contains(&record.id) {
                    duplicate_ids.push(record.id.clone());
                }
                unique[index] = record.clone();
            }
            None => {
                position.insert(record.id.as_str(), unique.len());
                unique.push(record.clone());
            }
        }
    }

    (unique, duplicate_ids)
}

/// Add `incoming` topics to `existing`, merging subtopics of same-named topics.
fn merge_topics(existing: &mut Vec<Topic>, incoming: Vec<Topic>) {
    for topic in incoming {
        match existing.iter_mut().find(|t| t.name == topic.name) {
            Some(current) => {
                for subtopic in topic.subtopics {
                    if !current.subtopics.contains(&subtopic) {
                        current.subtopics.push(subtopic);
                    }
                }
            }
            None => existing.push(topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoteTally;

    fn records() -> Vec<Record> {
        vec![
            Record::new("1", "More bike lanes").with_votes("group-1", VoteTally::new(4, 1, 0)),
            Record::new("2", "Fewer cars downtown"),
            Record::new("3", "Lower bus fares"),
        ]
    }

    #[test]
    fn test_empty_partials_yield_nothing() {
        assert!(hydrate(vec![], &records()).is_empty());
    }

    #[test]
    fn test_no_authoritative_records_drops_everything() {
        let partials = vec![
            PartialRecord::new("1", vec![Topic::new("Transit")]),
            PartialRecord::new("2", vec![Topic::new("Transit")]),
        ];
        let result = reconcile(partials, &[]);
        assert!(result.records.is_empty());
        assert_eq!(result.orphan_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_topics_overwritten_other_fields_preserved() {
        let authoritative = vec![
            records()[0]
                .clone()
                .with_topics(vec![Topic::new("Stale")]),
        ];
        let topics = vec![Topic::with_subtopics("Transit", ["Cycling"])];

        let hydrated = hydrate(vec![PartialRecord::new("1", topics.clone())], &authoritative);

        let expected = Record {
            topics,
            ..authoritative[0].clone()
        };
        assert_eq!(hydrated, vec![expected]);
    }

    #[test]
    fn test_output_follows_partial_order_and_drops_orphans() {
        let partials = vec![
            PartialRecord::new("3", vec![Topic::new("Fares")]),
            PartialRecord::new("99", vec![Topic::new("Invented")]),
            PartialRecord::new("1", vec![Topic::new("Transit")]),
        ];
        let result = reconcile(partials, &records());

        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
        assert_eq!(result.records[0].text, "Lower bus fares");
        assert_eq!(result.orphan_ids, vec!["99"]);
        assert!(result.duplicate_ids.is_empty());
    }

    #[test]
    fn test_repeated_partial_id_is_emitted_once() {
        let partials = vec![
            PartialRecord::new("2", vec![Topic::with_subtopics("Transit", ["Cars"])]),
            PartialRecord::new("1", vec![Topic::new("Transit")]),
            PartialRecord::new(
                "2",
                vec![
                    Topic::with_subtopics("Transit", ["Cars", "Parking"]),
                    Topic::new("Environment"),
                ],
            ),
        ];
        let hydrated = hydrate(partials, &records());

        assert_eq!(hydrated.len(), 2);
        assert_eq!(hydrated[0].id, "2");
        assert_eq!(
            hydrated[0].topics,
            vec![
                Topic::with_subtopics("Transit", ["Cars", "Parking"]),
                Topic::new("Environment"),
            ]
        );
    }

    #[test]
    fn test_duplicate_authoritative_ids_are_reported_and_last_wins() {
        let authoritative = vec![Record::new("1", "first"), Record::new("1", "second")];
        let result = reconcile(
            vec![PartialRecord::new("1", vec![Topic::new("T")])],
            &authoritative,
        );
        assert_eq!(result.duplicate_ids, vec!["1"]);
        assert_eq!(result.records[0].text, "second");
    }

    #[test]
    fn test_dedupe_keeps_first_position_and_last_content() {
        let records = vec![
            Record::new("x", "first"),
            Record::new("y", "other"),
            Record::new("x", "second"),
            Record::new("x", "third"),
        ];
        let (unique, duplicate_ids) = dedupe_by_id(&records);

        let texts: Vec<(&str, &str)> = unique
            .iter()
            .map(|r| (r.id.as_str(), r.text.as_str()))
            .collect();
        assert_eq!(texts, vec![("x", "third"), ("y", "other")]);
        assert_eq!(duplicate_ids, vec!["x"]);
    }
}
