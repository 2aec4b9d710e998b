//! Reconciliation of model output with authoritative records.
//!
//! - `hydrate`: merge the model's partial records back onto the originals by id
//! - `group_by_subtopic`: index annotated records by topic and subtopic

mod grouping;
mod hydrate;

pub use grouping::*;
pub use hydrate::*;
