//! Topic categorization pipeline.
//!
//! Pipeline flow:
//! Records → batches → prompt → model (retry until every id is labelled)
//! → hydrate onto originals → group by topic/subtopic

use crate::client::{ModelClient, generate_data};
use crate::invoke::{Attempted, RetryPolicy, retry_call_counted};
use crate::models::{Config, PartialRecord, Record, Result, SensemakeError};
use crate::reconcile::{Grouping, GroupingIndex, dedupe_by_id, group_with_report, reconcile};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const DEFAULT_INSTRUCTIONS: &str = "You are categorizing public comments. \
Assign every comment below to one or more topics, and to one or more subtopics \
within each topic.";

/// Counters for one categorization run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizationStats {
    /// Distinct records handed to the pipeline
    pub total_records: usize,

    /// Ids that occurred more than once in the input; the last occurrence was kept
    pub duplicate_ids: Vec<String>,

    /// Batches sent to the model
    pub total_batches: usize,

    /// Batches that exhausted their retry budget
    pub failed_batches: usize,

    /// Records that came back with topics
    pub categorized: usize,

    /// Records in failed batches
    pub uncategorized: usize,

    /// Ids the model returned that were never sent
    pub orphans: usize,

    /// Failed attempts → number of batches. Exhausted batches count all
    /// their attempts as failed.
    pub retry_histogram: BTreeMap<u32, usize>,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Categorized share of all records (0.0 - 1.0)
    pub coverage: f64,
}

impl CategorizationStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_records > 0 {
            self.coverage = self.categorized as f64 / self.total_records as f64;
        }
    }
}

/// Output of a categorization run.
#[derive(Debug, Clone)]
pub struct CategorizationRun {
    /// Records with their assigned topics, in input order of batches
    pub records: Vec<Record>,
    /// Topic index over `records`
    pub grouping: Grouping,
    pub stats: CategorizationStats,
}

/// Categorizes records into topics with a model.
pub struct CategorizationPipeline {
    model: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    batch_size: usize,
    instructions: String,
    max_concurrent: usize,
    show_progress: bool,
}

impl CategorizationPipeline {
    /// Create a pipeline from configuration.
    pub fn new(config: &Config, model: Arc<dyn ModelClient>) -> Self {
        let batch_size = config
            .categorization
            .batch_size
            .unwrap_or_else(|| model.categorization_batch_size())
            .max(1);

        Self {
            model,
            policy: config.retry.policy(),
            batch_size,
            instructions: config
                .categorization
                .instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            max_concurrent: config.categorization.max_concurrent_batches.max(1),
            show_progress: false,
        }
    }

    /// Show a progress bar while running.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Set how many batches may be in flight at once.
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load records from a JSONL file.
    pub fn load_records(path: &Path) -> Result<Vec<Record>> {
        let file = File::open(path).map_err(|e| SensemakeError::io("opening records file", e))?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SensemakeError::io("reading records file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line).map_err(|e| {
                SensemakeError::InvalidInput(format!("Line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }

        info!(count = records.len(), "Loaded records");
        Ok(records)
    }

    /// Load candidate topic names from a JSON array of strings.
    pub fn load_topics(path: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SensemakeError::io("reading topics file", e))?;
        serde_json::from_str(&content)
            .map_err(|e| SensemakeError::InvalidInput(format!("Topics file: {e}")))
    }

    /// Write a grouping index as pretty JSON.
    pub fn write_index(path: &Path, index: &GroupingIndex) -> Result<()> {
        let file =
            File::create(path).map_err(|e| SensemakeError::io("creating output file", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, index)
            .map_err(|e| SensemakeError::Internal(format!("Failed to serialize index: {e}")))?;
        writer
            .flush()
            .map_err(|e| SensemakeError::io("flushing output", e))
    }

    /// Build the prompt for one batch.
    pub fn build_prompt(&self, batch: &[Record], topics: &[String]) -> Result<String> {
        #[derive(Serialize)]
        struct PromptRecord<'a> {
            id: &'a str,
            text: &'a str,
        }

        let items: Vec<PromptRecord<'_>> = batch
            .iter()
            .map(|r| PromptRecord {
                id: &r.id,
                text: &r.text,
            })
            .collect();
        let data = serde_json::to_string_pretty(&items)
            .map_err(|e| SensemakeError::Internal(format!("Failed to serialize batch: {e}")))?;

        let mut prompt = String::with_capacity(self.instructions.len() + data.len() + 512);
        prompt.push_str(&self.instructions);
        prompt.push_str("\n\n");
        if topics.is_empty() {
            prompt.push_str("Choose concise topic and subtopic names yourself.\n");
        } else {
            prompt.push_str("Use only these topics:\n");
            for topic in topics {
                prompt.push_str("- ");
                prompt.push_str(topic);
                prompt.push('\n');
            }
        }
        prompt.push_str(
            "\nReturn a JSON array with one entry per comment, \
             each with the comment's \"id\" and its \"topics\". \
             Use every id exactly as given.\n\nComments:\n",
        );
        prompt.push_str(&data);
        Ok(prompt)
    }

    /// Categorize one batch, retrying until every record is labelled.
    pub async fn categorize_batch(
        &self,
        batch: &[Record],
        topics: &[String],
    ) -> Result<Vec<PartialRecord>> {
        let job = self.batch_job(batch, topics)?;
        job.run().await.map(|attempted| attempted.value)
    }

    fn batch_job(&self, batch: &[Record], topics: &[String]) -> Result<BatchJob> {
        Ok(BatchJob {
            model: Arc::clone(&self.model),
            policy: self.policy,
            prompt: self.build_prompt(batch, topics)?,
            expected: batch.iter().map(|r| r.id.clone()).collect(),
            allowed: topics.iter().cloned().collect(),
        })
    }

    /// Run the pipeline over all records.
    ///
    /// Records sharing an id are collapsed first, the last occurrence
    /// winning. Up to `max_concurrent` batches are in flight at once; results
    /// are merged in batch order. A batch that exhausts its retries is logged
    /// and counted; the run continues with the other batches.
    pub async fn run(&self, records: &[Record], topics: &[String]) -> Result<CategorizationRun> {
        let start = Instant::now();
        let (records, duplicate_ids) = dedupe_by_id(records);
        let mut stats = CategorizationStats {
            total_records: records.len(),
            duplicate_ids,
            ..Default::default()
        };

        info!(
            total_records = records.len(),
            duplicates = stats.duplicate_ids.len(),
            batch_size = self.batch_size,
            max_concurrent = self.max_concurrent,
            endpoint = self.model.name(),
            "Starting categorization"
        );

        let pb = if self.show_progress {
            let pb = ProgressBar::new(records.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for batch in records.chunks(self.batch_size) {
            let job = self.batch_job(batch, topics)?;
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SensemakeError::Internal("Semaphore closed".to_string()))?;
                job.run().await
            }));
        }
        stats.total_batches = handles.len();

        let mut categorized: Vec<Record> = Vec::with_capacity(records.len());

        for (index, (batch, handle)) in records.chunks(self.batch_size).zip(handles).enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SensemakeError::Internal(format!("Batch task failed: {e}"))),
            };

            match outcome {
                Ok(attempted) => {
                    *stats.retry_histogram.entry(attempted.retries()).or_default() += 1;
                    let merged = reconcile(attempted.value, batch);
                    stats.orphans += merged.orphan_ids.len();
                    stats.categorized += merged.records.len();
                    categorized.extend(merged.records);
                }
                Err(e) => {
                    if let SensemakeError::RetryExhausted { attempts, .. } = &e {
                        *stats.retry_histogram.entry(*attempts).or_default() += 1;
                    }
                    warn!(batch = index + 1, size = batch.len(), error = %e, "Batch failed");
                    stats.failed_batches += 1;
                    stats.uncategorized += batch.len();
                }
            }

            pb.inc(batch.len() as u64);
            pb.set_message(format!(
                "categorized: {}, failed batches: {}",
                stats.categorized, stats.failed_batches
            ));
        }

        pb.finish_with_message(format!(
            "Done! {} categorized, {} uncategorized",
            stats.categorized, stats.uncategorized
        ));

        let grouping = group_with_report(&categorized);

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        log_retry_summary(&stats.retry_histogram);
        info!(
            categorized = stats.categorized,
            failed_batches = stats.failed_batches,
            orphans = stats.orphans,
            topics = grouping.index.len(),
            coverage = format!("{:.1}%", stats.coverage * 100.0),
            "Categorization complete"
        );

        Ok(CategorizationRun {
            records: categorized,
            grouping,
            stats,
        })
    }
}

/// One batch's request, owned so it can run on its own task.
struct BatchJob {
    model: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    prompt: String,
    expected: HashSet<String>,
    allowed: HashSet<String>,
}

impl BatchJob {
    async fn run(&self) -> Result<Attempted<Vec<PartialRecord>>> {
        let expected: HashSet<&str> = self.expected.iter().map(String::as_str).collect();
        let allowed: HashSet<&str> = self.allowed.iter().map(String::as_str).collect();

        let model = self.model.as_ref();
        let prompt = self.prompt.as_str();
        retry_call_counted(
            move || generate_data::<Vec<PartialRecord>>(model, prompt),
            |partials: &Vec<PartialRecord>| covers_batch(partials, &expected, &allowed),
            &self.policy,
            "Topic categorization",
        )
        .await
    }
}

/// Log how many batches needed how many retries.
fn log_retry_summary(histogram: &BTreeMap<u32, usize>) {
    if histogram.is_empty() {
        return;
    }
    if histogram.keys().all(|&retries| retries == 0) {
        info!("All batches succeeded on the first attempt");
        return;
    }
    for (retries, batches) in histogram {
        info!(failed_attempts = *retries, batches = *batches, "Retry summary");
    }
}

/// Every expected id is present with at least one topic, and, when a topic
/// list was given, only listed topics are used.
fn covers_batch(
    partials: &[PartialRecord],
    expected: &HashSet<&str>,
    allowed: &HashSet<&str>,
) -> bool {
    let labelled: HashSet<&str> = partials
        .iter()
        .filter(|p| !p.topics.is_empty())
        .map(|p| p.id.as_str())
        .collect();

    let topics_allowed = allowed.is_empty()
        || partials
            .iter()
            .flat_map(|p| &p.topics)
            .all(|t| allowed.contains(t.name.as_str()));

    topics_allowed && expected.iter().all(|id| labelled.contains(id))
}
