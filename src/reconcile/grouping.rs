//! Topic → subtopic → record index over annotated records.

use crate::models::Record;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Sub-bucket for records labelled with a topic but no subtopic.
pub const UNSPECIFIED_SUBTOPIC: &str = "(unspecified)";

/// Records keyed by id.
pub type RecordsById = BTreeMap<String, Record>;

/// Topic name → subtopic name → record id → record.
///
/// Ordered maps, so two indexes built from the same records compare equal
/// and serialize identically regardless of input order.
pub type GroupingIndex = BTreeMap<String, BTreeMap<String, RecordsById>>;

/// Index plus the records that could not be placed in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    pub index: GroupingIndex,
    /// Ids of records with no topics
    pub unannotated_ids: Vec<String>,
}

/// Build the topic → subtopic → record index.
pub fn group_by_subtopic(records: &[Record]) -> GroupingIndex {
    group_with_report(records).index
}

/// Build the index and report records without topics.
///
/// A record is inserted once per (topic, subtopic) pair it carries, so the
/// index fans out rather than partitions. A topic without subtopics files
/// the record under [`UNSPECIFIED_SUBTOPIC`].
pub fn group_with_report(records: &[Record]) -> Grouping {
    let mut grouping = Grouping::default();

    for record in records {
        if !record.is_annotated() {
            warn!(id = %record.id, "Record has no topics, leaving it out of the index");
            grouping.unannotated_ids.push(record.id.clone());
            continue;
        }

        for topic in &record.topics {
            let subtopics = grouping.index.entry(topic.name.clone()).or_default();

            if topic.subtopics.is_empty() {
                debug!(id = %record.id, topic = %topic.name, "Topic has no subtopics");
                subtopics
                    .entry(UNSPECIFIED_SUBTOPIC.to_string())
                    .or_default()
                    .insert(record.id.clone(), record.clone());
                continue;
            }

            for subtopic in &topic.subtopics {
                subtopics
                    .entry(subtopic.name.clone())
                    .or_default()
                    .insert(record.id.clone(), record.clone());
            }
        }
    }

    grouping
}
