//! End-to-end pipelines.

mod categorize;

pub use categorize::*;
