//! sensemake - Schema-constrained topic categorization over an unreliable LLM.
//!
//! ## Architecture
//!
//! - **Clients**: `ModelClient` with free-text and schema-constrained
//!   generation; Ollama and OpenAI-compatible backends
//! - **Invoke**: `retry_call` retries any async operation until a
//!   caller-supplied predicate accepts its result
//! - **Reconcile**: `hydrate` merges model output back onto the caller's
//!   records by id; `group_by_subtopic` indexes them by topic and subtopic
//!
//! ## Pipeline
//!
//! Records → batched prompt → `retry_call(generate_data)` → `hydrate` →
//! `group_by_subtopic`
//!
//! Model clients never retry on their own. Reconciliation never fails: it
//! drops what it cannot place and reports it.

pub mod client;
pub mod invoke;
pub mod models;
pub mod pipeline;
pub mod reconcile;

// Re-exports for convenience
pub use client::{ModelClient, OllamaModel, OpenAiCompatModel, Schema, build_model, generate_data};
pub use invoke::{RetryPolicy, retry_call};
pub use models::{Config, PartialRecord, Record, Result, SensemakeError, Topic};
pub use pipeline::CategorizationPipeline;
pub use reconcile::{GroupingIndex, group_by_subtopic, hydrate};
