//! Resilient invocation of fallible async operations.

mod retry;

pub use retry::*;
