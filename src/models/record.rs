//! Record and annotation types for sensemake.
//!
//! A `Record` is authoritative: it comes from the caller's dataset and is
//! never created by the model. A `PartialRecord` is what the model returns,
//! and only its `topics` are ever trusted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input record with stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier for this record
    pub id: String,

    /// The text payload shown to the model
    pub text: String,

    /// Per-group vote counts, keyed by group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_tally: Option<BTreeMap<String, VoteTally>>,

    /// Topic annotations (empty until categorized)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Topic>,
}

impl Record {
    /// Create an unannotated record without votes.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vote_tally: None,
            topics: Vec::new(),
        }
    }

    /// Attach topics, replacing any existing ones.
    pub fn with_topics(mut self, topics: Vec<Topic>) -> Self {
        self.topics = topics;
        self
    }

    /// Attach a vote tally for one group.
    pub fn with_votes(mut self, group: impl Into<String>, tally: VoteTally) -> Self {
        self.vote_tally
            .get_or_insert_with(BTreeMap::new)
            .insert(group.into(), tally);
        self
    }

    /// Whether the record carries at least one topic.
    pub fn is_annotated(&self) -> bool {
        !self.topics.is_empty()
    }

    /// Votes summed across every group.
    pub fn total_votes(&self) -> VoteTally {
        self.vote_tally
            .iter()
            .flat_map(|groups| groups.values())
            .fold(VoteTally::default(), |acc, t| acc + *t)
    }
}

/// Agree/disagree/pass counts for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    #[serde(default)]
    pub agree_count: u64,
    #[serde(default)]
    pub disagree_count: u64,
    #[serde(default)]
    pub pass_count: u64,
}

impl VoteTally {
    pub fn new(agree_count: u64, disagree_count: u64, pass_count: u64) -> Self {
        Self {
            agree_count,
            disagree_count,
            pass_count,
        }
    }

    /// Total number of votes cast, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.agree_count
            .saturating_add(self.disagree_count)
            .saturating_add(self.pass_count)
    }

    fn rate(&self, count: u64) -> f64 {
        match self.total() {
            0 => 0.0,
            total => count as f64 / total as f64,
        }
    }

    pub fn agree_rate(&self) -> f64 {
        self.rate(self.agree_count)
    }

    pub fn disagree_rate(&self) -> f64 {
        self.rate(self.disagree_count)
    }

    pub fn pass_rate(&self) -> f64 {
        self.rate(self.pass_count)
    }

    /// How divisive the votes are: 1.0 for an even agree/disagree split with
    /// no passes, 0.0 for unanimity or when nobody voted.
    pub fn difference_of_opinion_rank(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        1.0 - (self.agree_rate() - self.disagree_rate()).abs() - self.pass_rate()
    }
}

impl std::ops::Add for VoteTally {
    type Output = VoteTally;

    fn add(self, rhs: VoteTally) -> VoteTally {
        VoteTally {
            agree_count: self.agree_count.saturating_add(rhs.agree_count),
            disagree_count: self.disagree_count.saturating_add(rhs.disagree_count),
            pass_count: self.pass_count.saturating_add(rhs.pass_count),
        }
    }
}

/// Top-level topic label, optionally refined by subtopics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Topic {
    /// Topic name
    pub name: String,

    /// Subtopics; empty for a top-level-only label
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtopics: Vec<Subtopic>,
}

impl Topic {
    /// Top-level-only topic.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subtopics: Vec::new(),
        }
    }

    /// Topic with the given subtopic names.
    pub fn with_subtopics<I, S>(name: impl Into<String>, subtopics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            subtopics: subtopics.into_iter().map(Subtopic::new).collect(),
        }
    }
}

/// Second-level topic label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Subtopic {
    /// Subtopic name
    pub name: String,
}

impl Subtopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Model output for one record: its id and the topics assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PartialRecord {
    /// Id of the record this annotation belongs to
    pub id: String,

    /// Assigned topics
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl PartialRecord {
    pub fn new(id: impl Into<String>, topics: Vec<Topic>) -> Self {
        Self {
            id: id.into(),
            topics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_deserializes_without_optional_fields() {
        let record: Record = serde_json::from_str(r#"{"id": "7", "text": "More parks"}"#).unwrap();
        assert_eq!(record, Record::new("7", "More parks"));
        assert!(!record.is_annotated());
        assert_eq!(record.total_votes().total(), 0);
    }

    #[test]
    fn test_record_serialization_omits_empty_fields() {
        let json = serde_json::to_value(Record::new("1", "A")).unwrap();
        assert_eq!(json, serde_json::json!({"id": "1", "text": "A"}));
    }

    #[test]
    fn test_total_votes_sums_groups() {
        let record = Record::new("1", "A")
            .with_votes("group-1", VoteTally::new(3, 1, 0))
            .with_votes("group-2", VoteTally::new(1, 3, 2));
        assert_eq!(record.total_votes(), VoteTally::new(4, 4, 2));
    }

    #[test]
    fn test_huge_counts_saturate() {
        let tally = VoteTally::new(u64::MAX, 1, 1);
        assert_eq!(tally.total(), u64::MAX);

        let record = Record::new("1", "A")
            .with_votes("group-1", VoteTally::new(u64::MAX, 0, 0))
            .with_votes("group-2", VoteTally::new(5, 0, 0));
        assert_eq!(record.total_votes().agree_count, u64::MAX);
    }

    #[test]
    fn test_difference_of_opinion_rank() {
        assert_eq!(VoteTally::new(5, 5, 0).difference_of_opinion_rank(), 1.0);
        assert_eq!(VoteTally::new(10, 0, 0).difference_of_opinion_rank(), 0.0);
        assert_eq!(VoteTally::default().difference_of_opinion_rank(), 0.0);

        let tally = VoteTally::new(2, 1, 1);
        assert!((tally.difference_of_opinion_rank() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_topic_subtopics_default_to_empty() {
        let topic: Topic = serde_json::from_str(r#"{"name": "Safety"}"#).unwrap();
        assert_eq!(topic, Topic::new("Safety"));

        let partial: PartialRecord = serde_json::from_str(
            r#"{"id": "2", "topics": [{"name": "Safety", "subtopics": [{"name": "Risk"}]}]}"#,
        )
        .unwrap();
        assert_eq!(
            partial.topics,
            vec![Topic::with_subtopics("Safety", ["Risk"])]
        );
    }
}
